//! External stores.
//!
//! The bus persists destination configurations through a
//! [`DestinationStore`] and patches crashed executions through an
//! [`ExecutionStore`]. Both are owned by the embedding application; this
//! module ships a filesystem and a SQLite destination store plus in-memory
//! implementations of both.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::destination::DestinationOptions;
use crate::execution::{ExecutionSnapshot, RunExecutionData};

pub mod filesystem;
pub mod mock;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use filesystem::FilesystemDestinationStore;
pub use mock::{MockDestinationStore, MockExecutionStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDestinationStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the external stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for destination configurations.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Every stored configuration.
    async fn load_all(&self) -> Result<Vec<DestinationOptions>>;

    /// Insert or replace the configuration with the same id.
    async fn save(&self, options: &DestinationOptions) -> Result<()>;

    /// Delete a configuration. Deleting an unknown id succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// The slice of the execution store recovery needs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn get_execution_by_id(&self, id: &str) -> Result<Option<ExecutionSnapshot>>;

    async fn patch_execution_run_data(&self, id: &str, run_data: &RunExecutionData) -> Result<()>;
}

/// Destination store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationStoreConfig {
    /// Store type: `filesystem`, `sqlite` or `memory`.
    #[serde(rename = "type")]
    pub store_type: String,
    /// Directory (filesystem) or database file (sqlite).
    pub path: String,
}

impl Default for DestinationStoreConfig {
    fn default() -> Self {
        Self {
            store_type: "filesystem".to_string(),
            path: "./data/destinations".to_string(),
        }
    }
}

/// Initialize the destination store selected by `config`.
pub async fn init_destination_store(
    config: &DestinationStoreConfig,
) -> Result<Arc<dyn DestinationStore>> {
    info!(
        store_type = %config.store_type,
        path = %config.path,
        "Initializing destination store"
    );

    match config.store_type.as_str() {
        "filesystem" => Ok(Arc::new(FilesystemDestinationStore::new(&config.path).await?)),
        "memory" => Ok(Arc::new(MockDestinationStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
            let store = SqliteDestinationStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            error!("SQLite destination store requested but 'sqlite' feature is not enabled");
            Err(StorageError::Unavailable(
                "sqlite feature not enabled".to_string(),
            ))
        }
        other => {
            error!(store_type = %other, "Unknown destination store type");
            Err(StorageError::Unavailable(format!(
                "unknown destination store type: {}",
                other
            )))
        }
    }
}

/// Reject ids that cannot be used as a file name or primary key.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}
