pub mod config;
pub mod error;
pub mod logger;
pub mod models;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod storage;
pub mod validation;
pub mod vector_math;

pub use config::{Config, LimitsConfig, PostgresConfig, StorageBackend};
pub use error::{BackendError, BackendErrorKind, RecordStoreError, Result};
pub use models::*;
pub use service::VectorRecordService;
pub use storage::{DocumentStore, MemoryDocumentStore, StoreClient};
#[cfg(feature = "postgres")]
pub use storage::PostgresDocumentStore;
pub use validation::{FieldError, RecordValidator, ValidationErrors, ValidationMode};
