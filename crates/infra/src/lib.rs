//! Infrastructure layer: retries, batching, storage, transactions and the content service.

pub mod batch;
pub mod blob_store;
pub mod config;
pub mod content_service;
pub mod fault_plan;
pub mod record_store;
pub mod reporting;
pub mod retry;
pub mod saga;
pub mod storage;


pub use batch::{BatchOutcome, BatchProcessor, PartialBatchError};
pub use config::{ContentServiceConfig, DatabaseConfig, StorageConfig};
pub use content_service::{ContentError, ContentService, ErrorCategory};
pub use retry::{RetryOn, RetryPolicy, execute_with_retry};
pub use saga::{Step, TransactionCoordinator, TransactionError, TransactionState};
pub use storage::{StorageError, StorageGateway};
