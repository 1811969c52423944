pub mod chat;
pub mod consent;
pub mod init;
pub mod provision;
pub mod sessions;

use std::sync::Arc;

use orgclaw_config::AppConfig;
use orgclaw_store::{InMemoryStore, SqliteStore};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// The record store selected by `store.backend`.
///
/// Commands are generic over the store, so each one matches on this and
/// runs the same body for both arms.
pub enum OpenStore {
    Sqlite(Arc<SqliteStore>),
    Memory(Arc<InMemoryStore>),
}

pub async fn open_store(config: &AppConfig) -> Result<OpenStore, Box<dyn std::error::Error>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!("Using the in-memory store; nothing will outlive this process");
            Ok(OpenStore::Memory(Arc::new(InMemoryStore::new())))
        }
        _ => {
            let path = config.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::new(&path.to_string_lossy())
                .await
                .map_err(|e| format!("Failed to open database {}: {e}", path.display()))?;
            Ok(OpenStore::Sqlite(Arc::new(store)))
        }
    }
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
