use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::{Result, Error};
use log::warn;

/// Snapshot files backing the in-memory engines.
///
/// Persistence uses an atomic "write-then-rename" strategy to ensure data integrity.
/// Each snapshot (a storage area or a database) is stored in its own `.json` file.
pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { data_dir: dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Writes one snapshot to `<name>.json` atomically.
    ///
    /// The data goes to a temporary file first and is then renamed over the
    /// final destination, so readers never observe a half-written file.
    pub fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let file_path = self.snapshot_path(name)?;
        let temp_path = file_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &file_path)?;

        Ok(())
    }

    /// Loads the snapshot called `name`, if it exists.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let file_path = self.snapshot_path(name)?;
        if !file_path.exists() {
            return Ok(None);
        }
        let content = fs::read(&file_path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Loads every snapshot found in the data directory.
    ///
    /// Files that cannot be read or parsed are skipped with a warning.
    pub fn load_all<T: DeserializeOwned>(&self) -> Result<HashMap<String, T>> {
        let mut all_data = HashMap::new();

        if !self.data_dir.exists() {
            return Ok(all_data);
        }

        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                let name = path.file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| Error::Internal("Invalid filename".to_string()))?
                    .to_string();

                let content = match fs::read(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Could not read snapshot file {:?}: {}", path, e);
                        continue;
                    }
                };

                let data: T = match serde_json::from_slice(&content) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Could not unmarshal snapshot {:?}: {}", path, e);
                        continue;
                    }
                };

                all_data.insert(name, data);
            }
        }

        Ok(all_data)
    }

    /// Whether `name` can be used as a snapshot file name.
    pub fn is_valid_name(name: &str) -> bool {
        !(name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.'))
    }

    fn snapshot_path(&self, name: &str) -> Result<PathBuf> {
        if !Self::is_valid_name(name) {
            return Err(Error::Internal(format!("invalid snapshot name: {:?}", name)));
        }
        Ok(self.data_dir.join(format!("{}.json", name)))
    }
}
