//! # faultline - In-process Error Registry
//!
//! Capture errors together with their cause chains, query what was
//! captured, and swap the storage backend at runtime without losing a
//! single capture.
//!
//! ## Features
//!
//! - **Comparable records**: an error captured twice yields equal records
//! - **Whole chains**: causes and suppressed companions are recorded too
//! - **Lazy queries**: filters compose, nothing runs until a terminal call
//! - **Live swap**: drain-then-switch under an exclusive lock
//!
//! ## Quick Start
//!
//! ```
//! use faultline::{traced, query};
//!
//! fn flush() -> Result<(), faultline::TracedError> {
//!     Err(traced!("IOFailure", "disk full"))
//! }
//!
//! if let Err(err) = flush() {
//!     faultline::capture(&err);
//! }
//!
//! let roots = query().with_type("IOFailure").without_parent().to_list();
//! assert_eq!(roots[0].root().unwrap().method(), "flush");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │           capture(), query(), replace_backend()             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RegistryFront                            │
//! │        RwLock<Arc<dyn Backend>>: capture shared, swap excl  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌───────────────┐                     ┌───────────────┐
//!    │ MemoryBackend │ ──drain on swap──▶  │  any Backend  │
//!    └───────────────┘                     └───────────────┘
//! ```

use std::error::Error;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

// Re-export core types
pub use faultline_core::{
    Backend,
    BoxError,
    Clock,
    Collector,
    Counting,
    Distinct,
    ErrorQuery,
    ErrorRecord,
    GroupByType,
    ManualClock,
    MemoryBackend,
    Predicate,
    RaisedError,
    RecordBuilder,
    RegistryConfig,
    RegistryError,
    RegistryFront,
    RegistryResult,
    SnapshotQuery,
    SourceId,
    StackFrame,
    SystemClock,
    ToList,
    TracedError,
};

// Re-export macros
pub use faultline_core::{here, traced};

// Re-export modules for less common items
pub use faultline_core::{backend, clock, config, frame, raised, record};

static REGISTRY: OnceLock<RegistryFront> = OnceLock::new();

/// Set up the process-wide registry with `config`.
///
/// Must run before the first use of [`registry`]; fails with
/// [`RegistryError::AlreadyInitialized`] afterwards.
pub fn init(config: RegistryConfig) -> RegistryResult<&'static RegistryFront> {
    let front = RegistryFront::in_memory_with(config)?;
    let mut fresh = false;
    let registry = REGISTRY.get_or_init(|| {
        fresh = true;
        front
    });
    if fresh {
        Ok(registry)
    } else {
        Err(RegistryError::AlreadyInitialized)
    }
}

/// The process-wide registry.
///
/// Created on first use from `FAULTLINE_*` environment variables; an
/// invalid environment falls back to the defaults.
pub fn registry() -> &'static RegistryFront {
    REGISTRY.get_or_init(|| {
        let config = RegistryConfig::from_env();
        match RegistryFront::in_memory_with(config) {
            Ok(front) => {
                debug!(config = ?front.config(), "process registry created");
                front
            }
            Err(err) => {
                warn!(error = %err, "ignoring FAULTLINE_* environment");
                RegistryFront::in_memory()
            }
        }
    })
}

/// Capture `error` into the process-wide registry.
pub fn capture<E>(error: &E)
where
    E: Error + 'static,
{
    registry().capture(error);
}

pub fn capture_dyn(error: &(dyn Error + 'static)) {
    registry().capture_dyn(error);
}

pub fn register(record: Arc<ErrorRecord>) {
    registry().register(record);
}

/// Query the process-wide registry.
pub fn query() -> Box<dyn ErrorQuery> {
    registry().query()
}

/// Swap the process-wide backend, moving every record into `backend`.
/// Returns the previous backend.
///
/// Bounded by the registry's `swap_timeout` (`FAULTLINE_SWAP_TIMEOUT_MS`);
/// on [`RegistryError::LockTimeout`] nothing has moved.
pub fn replace_backend(backend: Arc<dyn Backend>) -> RegistryResult<Arc<dyn Backend>> {
    registry().replace_bounded(backend)
}
