//! Offline-first folder reading queue backed by a News API server.
//!
//! [`FolderQueueController`] owns the cached queue: it hydrates from a
//! [`KeyValueStore`], reconciles fresh server data into it and applies the
//! read, skip and restart actions optimistically.

pub mod core;

use std::path::Path;
use std::sync::Arc;

pub use crate::core::config::{ConfigError, NewsApiConfig, QueueConfig};
pub use crate::core::feed::client::{ApiError, NewsApi, NewsClient};
pub use crate::core::queue::{ArticlePreview, FolderQueueEntry, QueueStatus};
pub use crate::core::storage::envelope::{TimelineCacheEnvelope, TimelineCacheStore};
pub use crate::core::storage::memory::{MemoryStore, NullStore};
pub use crate::core::storage::repository::{KeyValueStore, SqliteStore, StorageError};
pub use crate::core::sync::{
    spawn_refresh_loop, FolderQueueController, QueueSnapshot, ReconcileOutcome, RemoteSnapshot,
    SyncError,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("news api credentials are not configured")]
    NotConfigured,
}

pub type SqliteController = FolderQueueController<SqliteStore, NewsClient>;

/// Wires a controller from the environment: queue settings, News API
/// credentials and a SQLite cache at `database_path`. The refresh loop is
/// started on the current tokio runtime.
pub async fn start_from_env(
    database_path: &Path,
) -> Result<(Arc<SqliteController>, tokio::task::JoinHandle<()>), StartupError> {
    let queue_config = QueueConfig::from_env()?;
    let api_config = NewsApiConfig::from_env()?.ok_or(StartupError::NotConfigured)?;
    let client = NewsClient::new(&api_config)?;
    let store = SqliteStore::open(database_path).await?;
    let interval = queue_config.refresh_interval();

    let controller = Arc::new(FolderQueueController::new(store, client, queue_config));
    let handle = spawn_refresh_loop(Arc::clone(&controller), interval);
    tracing::info!(
        "folder queue started against {} with a {}s refresh interval",
        api_config.base_url,
        interval.as_secs()
    );
    Ok((controller, handle))
}
