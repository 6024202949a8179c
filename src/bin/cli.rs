use satchel_store::sdk::{self, CollectionSchema, Config, DatabaseSchema};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::env;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    Get { key: String },
    Set { key: String, value: String },
    Del { key: String },
    Keys,
    PoolGet { pool: String, field: String },
    PoolSet { pool: String, field: String, value: String },
    PoolKeys { pool: String },
    DbGet {
        db: String,
        collection: String,
        key: String,
        #[arg(long, default_value_t = 1)]
        version: u32,
        #[arg(long, default_value = "id")]
        key_path: String,
    },
    DbPut {
        db: String,
        collection: String,
        record: String,
        #[arg(long, default_value_t = 1)]
        version: u32,
        #[arg(long, default_value = "id")]
        key_path: String,
    },
    DbClear {
        db: String,
        collection: String,
        #[arg(long, default_value_t = 1)]
        version: u32,
        #[arg(long, default_value = "id")]
        key_path: String,
    },
}

/// Parses `raw` as JSON, falling back to a plain string.
fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn schema(db: &str, version: u32, collection: &str, key_path: &str) -> DatabaseSchema {
    DatabaseSchema::new(db, version).with_collection(CollectionSchema::new(collection).key_path(key_path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let data_dir = cli.data_dir
        .or_else(|| env::var("SATCHEL_DATA_DIR").ok())
        .unwrap_or_else(|| "data".to_string());
    let satchel = sdk::new(Config::from_env().with_data_dir(data_dir))?;
    let kv = satchel.storage().persistent();

    match cli.command {
        Commands::Get { key } => {
            let val = kv.get(&key).unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        Commands::Set { key, value } => {
            kv.set(&key, &parse_value(value))?;
            println!("OK");
        }
        Commands::Del { key } => {
            kv.remove(&key)?;
            println!("OK");
        }
        Commands::Keys => {
            println!("{}", serde_json::to_string_pretty(&kv.keys())?);
        }
        Commands::PoolGet { pool, field } => {
            let val = kv.pool(&pool)?.get(&field).unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        Commands::PoolSet { pool, field, value } => {
            kv.pool(&pool)?.set(&field, parse_value(value))?;
            println!("OK");
        }
        Commands::PoolKeys { pool } => {
            println!("{}", serde_json::to_string_pretty(&kv.pool(&pool)?.keys())?);
        }
        Commands::DbGet { db, collection, key, version, key_path } => {
            let db = satchel.database(schema(&db, version, &collection, &key_path));
            db.open().await?;
            let val = db.transaction(&collection)?.get(parse_value(key)).await?.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        Commands::DbPut { db, collection, record, version, key_path } => {
            let db = satchel.database(schema(&db, version, &collection, &key_path));
            db.open().await?;
            let record: Value = serde_json::from_str(&record)?;
            let key = db.transaction(&collection)?.put(record).await?;
            println!("OK {}", key);
        }
        Commands::DbClear { db, collection, version, key_path } => {
            let db = satchel.database(schema(&db, version, &collection, &key_path));
            db.open().await?;
            db.transaction(&collection)?.clear().await?;
            println!("OK");
        }
    }

    satchel.wait().await;
    Ok(())
}
