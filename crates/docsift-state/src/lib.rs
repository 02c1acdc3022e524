//! Docsift-State: model records and the repository seam
//!
//! This crate holds the persistence-facing half of the serving control plane:
//! the records the control plane reads and mutates, and the trait a storage
//! backend implements to hold them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record integrity, atomic usage updates, and the single-production
//! invariant enforced by the promotion transaction.
//!
//! ## Key Components
//!
//! - `ModelRecord`: A trained model version and its deployment/usage state
//! - `EvaluationRecord`: One scored prediction produced by the evaluation job
//! - `ModelRepository`: Backend-agnostic async CRUD plus `promote`
//! - `fakes::MemoryModelRepository`: In-memory implementation

mod error;
pub mod fakes;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use schema::{DocumentType, EvaluationRecord, ModelId, ModelRecord, ModelStatus};
pub use storage_traits::{ModelFilter, ModelRepository, PromotionReceipt, StorageResult};
