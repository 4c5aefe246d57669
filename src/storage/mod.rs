pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod traits;

use crate::{
    config::{Config, StorageBackend},
    error::{RecordStoreError, Result},
};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use crate::error::{BackendError, BackendErrorKind};
pub use memory::MemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;
pub use query::{
    Condition, Field, FieldValue, Filter, FindOptions, GroupBy, GroupCount, GroupOrder,
    RecordUpdate, SortDirection, SortSpec,
};
pub use traits::{Cursor, DeleteOutcome, DocumentStore, InsertManyResult, ScoredRecord};

/// Owns the connection to the configured backend.
///
/// Constructed explicitly at startup and handed to whoever needs a store. `connect` and
/// `disconnect` are both idempotent.
pub struct StoreClient {
    config: Config,
    backend: RwLock<Option<Arc<dyn DocumentStore>>>,
}

impl StoreClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: RwLock::new(None),
        }
    }

    /// Wraps an already-built backend; the client starts out connected.
    pub fn with_backend(config: Config, backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            backend: RwLock::new(Some(backend)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let mut slot = self.backend.write().await;
        if let Some(backend) = slot.as_ref() {
            return Ok(Arc::clone(backend));
        }

        self.config.validate()?;
        let backend = self.build_backend().await?;
        let healthy = backend
            .health_check()
            .await
            .map_err(|e| RecordStoreError::store("connect", e))?;
        if !healthy {
            return Err(RecordStoreError::store(
                "connect",
                BackendError::new(BackendErrorKind::Connection, "health check failed"),
            ));
        }

        log::info!(
            "Connected to {} backend (collection '{}')",
            backend.backend_name(),
            self.config.collection_name
        );
        *slot = Some(Arc::clone(&backend));
        Ok(backend)
    }

    async fn build_backend(&self) -> Result<Arc<dyn DocumentStore>> {
        let backend: Arc<dyn DocumentStore> = match self.config.backend {
            StorageBackend::Memory => Arc::new(MemoryDocumentStore::new()),
            StorageBackend::Postgres => {
                #[cfg(feature = "postgres")]
                {
                    let postgres_config = self.config.postgres.clone().ok_or_else(|| {
                        RecordStoreError::ConfigError("PostgreSQL config required".into())
                    })?;
                    Arc::new(
                        PostgresDocumentStore::new(postgres_config, &self.config.collection_name)
                            .await?,
                    )
                }
                #[cfg(not(feature = "postgres"))]
                {
                    return Err(RecordStoreError::ConfigError(
                        "PostgreSQL feature not enabled".into(),
                    ));
                }
            }
        };
        Ok(backend)
    }

    pub async fn is_connected(&self) -> bool {
        self.backend.read().await.is_some()
    }

    pub async fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.backend.read().await.clone().ok_or_else(|| {
            RecordStoreError::store(
                "store",
                BackendError::new(BackendErrorKind::NotConnected, "client is not connected"),
            )
        })
    }

    pub async fn health_check(&self) -> Result<bool> {
        let Some(backend) = self.backend.read().await.clone() else {
            return Ok(false);
        };
        backend
            .health_check()
            .await
            .map_err(|e| RecordStoreError::store("health_check", e))
    }

    pub async fn disconnect(&self) -> Result<()> {
        let Some(backend) = self.backend.write().await.take() else {
            return Ok(());
        };
        backend
            .close()
            .await
            .map_err(|e| RecordStoreError::store("disconnect", e))?;
        log::info!("Disconnected from {} backend", backend.backend_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_is_idempotent() {
        let client = StoreClient::new(Config::new());
        let first = client.connect().await.unwrap();
        let second = client.connect().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn store_requires_connection() {
        let client = StoreClient::new(Config::new());
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.store().await,
            Err(RecordStoreError::StoreError { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_closes_backend_once() {
        let client = StoreClient::new(Config::new());
        let backend = client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();

        assert!(!client.is_connected().await);
        assert!(!backend.health_check().await.unwrap());
        assert!(!client.health_check().await.unwrap());
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn postgres_backend_needs_feature() {
        let config = Config::new().with_postgres(crate::config::PostgresConfig::new());
        let client = StoreClient::new(config);
        assert!(matches!(
            client.connect().await,
            Err(RecordStoreError::ConfigError(_))
        ));
    }
}
