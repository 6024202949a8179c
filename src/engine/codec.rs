use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use crate::Result;

/// Encodes a JSON value to the text form stored by a [`ScopedStore`](crate::ScopedStore).
pub fn encode(value: &Value) -> String {
    value.to_string()
}

/// Encodes any serializable value.
///
/// Fails only when `T`'s `Serialize` impl does (e.g. maps with non-string keys).
pub fn encode_typed<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes stored text. Absent or malformed input yields `None`, never an error.
pub fn decode(text: Option<&str>) -> Option<Value> {
    let text = text?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("Discarding undecodable value ({} bytes): {}", text.len(), e);
            None
        }
    }
}

/// Decodes stored text into `T`. Input that is malformed or has the wrong shape yields `None`.
pub fn decode_typed<T: DeserializeOwned>(text: Option<&str>) -> Option<T> {
    decode(text).and_then(|v| serde_json::from_value(v).ok())
}
