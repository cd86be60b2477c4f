//! Repository selection

use crate::config::StorageConfig;
use crate::error::DaemonResult;
use pledgebook_storage::memory::InMemoryRepository;
use pledgebook_storage::Repository;
use std::sync::Arc;

/// Open the repository described by `config`.
pub async fn open_repository(config: &StorageConfig) -> DaemonResult<Arc<dyn Repository>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; records are lost on exit");
            Ok(Arc::new(InMemoryRepository::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => open_postgres(url, *max_connections, *connect_timeout_secs).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    url: &str,
    max_connections: u32,
    connect_timeout_secs: u64,
) -> DaemonResult<Arc<dyn Repository>> {
    let repo = pledgebook_storage::postgres::PostgresRepository::connect_with_options(
        url,
        max_connections,
        connect_timeout_secs,
    )
    .await?;
    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(
    _url: &str,
    _max_connections: u32,
    _connect_timeout_secs: u64,
) -> DaemonResult<Arc<dyn Repository>> {
    Err(crate::error::DaemonError::Config(
        "postgres storage requested but pledgebookd was built without the `postgres` feature"
            .to_string(),
    ))
}
