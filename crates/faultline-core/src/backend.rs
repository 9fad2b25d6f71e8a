//! Storage backends
//!
//! A [`Backend`] holds captured records and answers queries over them.
//! Implementors only need [`register`](Backend::register) and
//! [`query`](Backend::query); capture expands the error and registers
//! each resulting record. The cause depth is chosen by the caller (the
//! front passes its configured `max_cause_depth`).
//!
//! [`MemoryBackend`] is the default: an append-only log in which writers
//! push onto a lock-free queue and never wait for readers.
//!
//! ```text
//!   capture/register ──push──▶ SegQueue (ingress)
//!                                  │ drained in push order on query()
//!                                  ▼
//!                          Mutex<Vec> (log) ──snapshot──▶ SnapshotQuery
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::trace;

use crate::query::{ErrorQuery, SnapshotQuery};
use crate::raised::RaisedError;
use crate::record::{self, ErrorRecord};

/// Storage contract shared by every backend.
///
/// All methods take `&self` and may be called from many threads at once.
pub trait Backend: Send + Sync {
    /// Expand `error` (root, causes, suppressed companions, at most
    /// `max_depth` causes deep) and append every resulting record.
    fn capture(&self, error: RaisedError<'_>, now: DateTime<Utc>, max_depth: usize) {
        for record in record::expand(error, now, max_depth) {
            self.register(record);
        }
    }

    /// Append one pre-built record.
    fn register(&self, record: Arc<ErrorRecord>);

    /// Query over everything held at call time.
    fn query(&self) -> Box<dyn ErrorQuery>;

    /// Short name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Number of records held.
    fn len(&self) -> usize {
        self.query().count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process, append-only backend. Nothing is ever evicted.
pub struct MemoryBackend {
    ingress: SegQueue<Arc<ErrorRecord>>,
    log:     Mutex<Vec<Arc<ErrorRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            ingress: SegQueue::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Move pending appends into the log, keeping push order.
    fn consolidate(&self, log: &mut Vec<Arc<ErrorRecord>>) {
        let before = log.len();
        while let Some(record) = self.ingress.pop() {
            log.push(record);
        }
        if log.len() > before {
            trace!(moved = log.len() - before, total = log.len(), "memory backend consolidated");
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    #[inline]
    fn register(&self, record: Arc<ErrorRecord>) {
        self.ingress.push(record);
    }

    fn query(&self) -> Box<dyn ErrorQuery> {
        let mut log = self.log.lock();
        self.consolidate(&mut log);
        Box::new(SnapshotQuery::new(log.as_slice()))
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn len(&self) -> usize {
        self.log.lock().len() + self.ingress.len()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("len", &self.len())
            .finish()
    }
}
