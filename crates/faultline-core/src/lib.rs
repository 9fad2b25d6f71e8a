//! # faultline-core
//!
//! In-process error registry: captured errors become immutable, comparable
//! records; records are inspected through lazy queries; the storage
//! backend can be swapped at runtime without losing or duplicating a
//! capture.
//!
//! ## Modules
//!
//! - `frame` - Stack frames, the `here!` macro and backtrace parsing
//! - `raised` - `TracedError` and the borrowed `RaisedError` view
//! - `record` - `ErrorRecord` and cause-chain expansion
//! - `query` - Lazy composable queries and collectors
//! - `backend` - Storage contract and the in-memory backend
//! - `front` - `RegistryFront`, capture entry point and backend swap
//! - `clock` - Timestamp source
//! - `config` - Tunables and environment overrides
//! - `error` - Error types
//!
//! ## Example
//!
//! ```
//! use faultline_core::{traced, RegistryFront};
//!
//! let registry = RegistryFront::in_memory();
//! let err = traced!("IOFailure", "disk full");
//! registry.capture(&err);
//!
//! assert_eq!(registry.query().with_type("IOFailure").count(), 1);
//! ```

pub mod frame;
pub mod raised;
pub mod record;
pub mod query;
pub mod backend;
pub mod front;
pub mod clock;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use frame::StackFrame;
pub use raised::{BoxError, RaisedError, SourceId, TracedError};
pub use record::{expand, ErrorRecord, RecordBuilder};
pub use query::{Collector, Counting, Distinct, ErrorQuery, GroupByType, Predicate, SnapshotQuery, ToList};
pub use backend::{Backend, MemoryBackend};
pub use front::RegistryFront;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{env_get, RegistryConfig, DEFAULT_MAX_CAUSE_DEPTH, MAX_CAUSE_DEPTH_LIMIT};
pub use error::{RegistryError, RegistryResult};
