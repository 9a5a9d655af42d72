//! TR-069 CPE parameter data model engine
//!
//! A lazily-materialized, instance-expandable parameter tree with mixed
//! storage backends (data-model values, system-sourced values, computed
//! expressions), a change-detecting expression evaluator for derived
//! parameters, a single-writer session lock with a deferred-notification
//! queue, XML data-model extension loading, and a statistics sampling and
//! aggregation subsystem.

pub mod adapter;
pub mod ast;
pub mod config;
pub mod error;
pub mod eval;
pub mod loader;
pub mod manager;
pub mod model;
pub mod parser;
pub mod persist;
pub mod session;
pub mod stats;
pub mod transfer;

// Re-export main types
pub use adapter::{DeviceAdapter, ObjectEntry};
pub use error::{DmResult, Fault, ParameterFault};
pub use manager::{DmEngine, Session};
pub use model::{ParamType, ParamValue, Parameter, ParameterStore, StorageMode};
pub use persist::{JsonFilePersistence, NullPersistence, Persistence, Snapshot};
pub use session::{NotificationQueue, SessionLock, SystemNotification};
pub use stats::{SampleData, StatsAggregator, StatsPoller};
pub use transfer::{TransferDirection, TransferQueue, TransferRequest, TransferState};
