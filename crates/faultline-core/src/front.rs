//! Registry front
//!
//! [`RegistryFront`] forwards captures to the current [`Backend`] and
//! coordinates replacing that backend at runtime.
//!
//! # Locking
//!
//! ```text
//!   capture / register / query     replace
//!   ───────────────────────────    ─────────────────────────────────
//!   read lock (shared)             write lock (exclusive)
//!   forward to current backend     drain current ──register──▶ next
//!                                  current = next
//! ```
//!
//! Captures share the lock and run concurrently; the backend's own append
//! is thread-safe. A swap excludes them for its whole drain-then-switch,
//! so a capture lands either in the old backend before the drain or in
//! the new one after it. Nothing is lost and nothing is applied twice.
//! Records the new backend already holds (the same `Arc`, e.g. when
//! swapping back to a previous backend) are not registered again.

use std::collections::HashSet;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::backend::{Backend, MemoryBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::query::ErrorQuery;
use crate::raised::RaisedError;
use crate::record::ErrorRecord;

/// Access point for capturing, querying and swapping backends.
pub struct RegistryFront {
    current: RwLock<Arc<dyn Backend>>,
    clock:   Arc<dyn Clock>,
    config:  RegistryConfig,
}

impl RegistryFront {
    /// Front over `backend` with the default configuration.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            current: RwLock::new(backend),
            clock: Arc::new(SystemClock),
            config: RegistryConfig::default(),
        }
    }

    /// Front over `backend` with a validated configuration.
    pub fn with_config(backend: Arc<dyn Backend>, config: RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(backend)
        })
    }

    /// Front over a fresh [`MemoryBackend`] with `config`.
    pub fn in_memory_with(config: RegistryConfig) -> RegistryResult<Self> {
        Self::with_config(Arc::new(MemoryBackend::new()), config)
    }

    /// Front over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Stamp captures with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Capture ───────────────────────────────────────────────────

    /// Capture `error` and its cause chain, up to the configured
    /// `max_cause_depth` whatever the current backend.
    ///
    /// Never fails and never panics: a backend that panics is logged and
    /// the capture is dropped.
    pub fn capture<E>(&self, error: &E)
    where
        E: Error + 'static,
    {
        self.capture_raised(RaisedError::of(error));
    }

    pub fn capture_dyn(&self, error: &(dyn Error + 'static)) {
        self.capture_raised(RaisedError::from_dyn(error));
    }

    pub fn capture_raised(&self, error: RaisedError<'_>) {
        let now = self.clock.now();
        let max_depth = self.config.max_cause_depth;
        let backend = self.current.read();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.capture(error, now, max_depth)));
        match outcome {
            Ok(()) => trace!(backend = backend.name(), "captured"),
            Err(payload) => warn!(
                backend = backend.name(),
                type_name = %error.type_name(),
                panic = panic_message(payload.as_ref()),
                "backend panicked during capture, error not recorded"
            ),
        }
    }

    /// Append a pre-built record to the current backend.
    pub fn register(&self, record: Arc<ErrorRecord>) {
        self.current.read().register(record);
    }

    // ── Query ─────────────────────────────────────────────────────

    /// Query the current backend.
    ///
    /// Takes the shared lock, so a query never observes a backend that is
    /// half way through a swap.
    pub fn query(&self) -> Box<dyn ErrorQuery> {
        self.current.read().query()
    }

    /// The backend captures currently go to.
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.current.read().clone()
    }

    pub fn backend_name(&self) -> String {
        self.current.read().name().to_string()
    }

    // ── Swap ──────────────────────────────────────────────────────

    /// Move every held record into `backend`, then make it current.
    ///
    /// Blocks until in-flight captures finish; captures arriving during
    /// the swap wait and then go to `backend`. Returns the previous
    /// backend. Passing the current backend again is a no-op, and records
    /// `backend` already holds are skipped.
    pub fn replace(&self, backend: Arc<dyn Backend>) -> Arc<dyn Backend> {
        let mut current = self.current.write();
        Self::swap_locked(&mut current, backend)
    }

    /// Like [`replace`](Self::replace), but gives up if exclusive access
    /// is not obtained within `timeout`.
    ///
    /// On timeout nothing has been drained or switched and `backend` is
    /// dropped.
    pub fn try_replace_for(
        &self,
        backend: Arc<dyn Backend>,
        timeout: Duration,
    ) -> RegistryResult<Arc<dyn Backend>> {
        let started = Instant::now();
        match self.current.try_write_for(timeout) {
            Some(mut current) => Ok(Self::swap_locked(&mut current, backend)),
            None => {
                let waited = started.elapsed();
                warn!(next = backend.name(), ?waited, "backend swap abandoned, lock busy");
                Err(RegistryError::LockTimeout { waited })
            }
        }
    }

    /// [`try_replace_for`](Self::try_replace_for) with the configured
    /// `swap_timeout`, or [`replace`](Self::replace) when none is set.
    pub fn replace_bounded(&self, backend: Arc<dyn Backend>) -> RegistryResult<Arc<dyn Backend>> {
        match self.config.swap_timeout {
            Some(timeout) => self.try_replace_for(backend, timeout),
            None => Ok(self.replace(backend)),
        }
    }

    fn swap_locked(current: &mut Arc<dyn Backend>, next: Arc<dyn Backend>) -> Arc<dyn Backend> {
        if same_backend(current, &next) {
            debug!(backend = next.name(), "replace with current backend ignored");
            return next;
        }

        let started = Instant::now();
        let mut held = HashSet::new();
        next.query().for_each(&mut |record| {
            held.insert(Arc::as_ptr(record));
        });

        let (mut moved, mut skipped) = (0usize, 0usize);
        current.query().for_each(&mut |record| {
            if held.contains(&Arc::as_ptr(record)) {
                skipped += 1;
            } else {
                next.register(Arc::clone(record));
                moved += 1;
            }
        });

        let previous = std::mem::replace(current, next);
        info!(
            from = previous.name(),
            to = current.name(),
            moved,
            skipped,
            elapsed = ?started.elapsed(),
            "backend replaced"
        );
        previous
    }
}

impl Default for RegistryFront {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for RegistryFront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryFront")
            .field("backend", &self.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

/// Data-pointer comparison; vtable pointers are not unique per type.
fn same_backend(a: &Arc<dyn Backend>, b: &Arc<dyn Backend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::StackFrame;
    use crate::query::SnapshotQuery;
    use crate::raised::TracedError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Test backend with a fixed name, backed by a plain vector.
    struct NamedBackend {
        name:    &'static str,
        records: Mutex<Vec<Arc<ErrorRecord>>>,
    }

    impl NamedBackend {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, records: Mutex::new(Vec::new()) })
        }
    }

    impl Backend for NamedBackend {
        fn register(&self, record: Arc<ErrorRecord>) {
            self.records.lock().push(record);
        }

        fn query(&self) -> Box<dyn ErrorQuery> {
            Box::new(SnapshotQuery::new(self.records.lock().clone()))
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct PanickingBackend;

    impl Backend for PanickingBackend {
        fn register(&self, _record: Arc<ErrorRecord>) {
            panic!("storage offline");
        }

        fn query(&self) -> Box<dyn ErrorQuery> {
            Box::new(SnapshotQuery::new(Vec::new()))
        }
    }

    #[derive(Debug)]
    struct Rejected {
        code: u32,
    }

    impl std::fmt::Display for Rejected {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "rejected with {}", self.code)
        }
    }

    impl Error for Rejected {}

    fn io_failure(n: u32) -> TracedError {
        TracedError::new("IOFailure", format!("write #{n}"))
            .at(StackFrame::new("app::disk", "write", n))
            .with_source(TracedError::new("DeviceError", "sector 7").at(StackFrame::new("app::dev", "read", 3)))
    }

    #[test]
    fn test_capture_end_to_end() {
        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let front = RegistryFront::in_memory().with_clock(clock.clone());

        front.capture(&io_failure(1));
        clock.advance(chrono::Duration::seconds(5));
        front.capture(&io_failure(2));

        let q = front.query();
        assert_eq!(q.count(), 4);
        assert_eq!(q.without_parent().count(), 2);
        assert_eq!(q.with_type("DeviceError").count(), 2);

        let first = q.first().unwrap();
        assert_eq!(first.type_name(), "IOFailure");
        assert_eq!(first.occurred_at(), clock.now() - chrono::Duration::seconds(5));
        assert_eq!(first.cause().unwrap().type_name(), "DeviceError");
    }

    #[test]
    fn test_root_query_excludes_causes() {
        let front = RegistryFront::in_memory();
        let err = TracedError::new("IOFailure", "disk full")
            .at(StackFrame::new("app::disk", "write", 1))
            .with_source(TracedError::of_type("DeviceError"));
        front.capture(&err);

        let io = front.query().with_type("IOFailure").to_list();
        assert_eq!(io.len(), 1);
        assert_eq!(io[0].message(), Some("disk full"));

        let roots = front.query().without_parent().to_list();
        assert_eq!(roots.len(), 1);
        assert!(Arc::ptr_eq(&roots[0], &io[0]));
    }

    #[test]
    fn test_capture_plain_error_is_partial() {
        let front = RegistryFront::in_memory();
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        front.capture(&err);
        front.capture_dyn(&err);

        let records = front.query().to_list();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.is_complete()));
        assert_eq!(records[0].message(), Some("config.toml"));
        assert!(records[0].type_name().ends_with("Error"));
    }

    #[test]
    fn test_capture_and_capture_dyn_agree() {
        let front = RegistryFront::in_memory();
        let err = Rejected { code: 4 };
        front.capture(&err);
        front.capture_dyn(&err);

        let roots = front.query().without_parent().to_list();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].type_name(), "Rejected");
        assert_eq!(roots[0], roots[1]);
        assert_eq!(front.query().distinct().len(), 1);
    }

    #[test]
    fn test_sequential_plain_errors_stay_distinct() {
        fn handle(front: &RegistryFront, code: u32) {
            let err = Rejected { code };
            front.capture(&err);
        }

        let front = RegistryFront::in_memory();
        for code in 0..3 {
            handle(&front, code);
        }

        let messages: Vec<_> = front
            .query()
            .distinct()
            .iter()
            .map(|r| r.message().unwrap_or_default().to_string())
            .collect();
        assert_eq!(messages, ["rejected with 0", "rejected with 1", "rejected with 2"]);
    }

    #[test]
    fn test_configured_depth_limits_every_capture() {
        let chain = || {
            TracedError::of_type("Top").with_source(
                TracedError::of_type("A").with_source(TracedError::of_type("B").with_source(TracedError::of_type("C"))),
            )
        };

        let config = RegistryConfig::default().max_cause_depth(1);
        let front = RegistryFront::with_config(Arc::new(MemoryBackend::new()), config).unwrap();
        front.capture(&chain());
        assert_eq!(front.query().count(), 2);

        let custom = RegistryFront::with_config(NamedBackend::new("custom"), RegistryConfig::default().max_cause_depth(2)).unwrap();
        custom.capture(&chain());
        let types: Vec<_> = custom.query().to_list().iter().map(|r| r.type_name().to_string()).collect();
        assert_eq!(types, ["Top", "A", "B"]);
    }

    #[test]
    fn test_recapture_is_equal() {
        let front = RegistryFront::in_memory();
        let err = io_failure(1);
        front.capture(&err);
        front.capture(&err);

        let roots = front.query().without_parent().to_list();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0], roots[1]);
        assert_eq!(front.query().distinct().len(), 2);
    }

    #[test]
    fn test_register_explicit_record() {
        let front = RegistryFront::in_memory();
        let record = ErrorRecord::relayed(crate::SourceId::Token(7), "Remote", chrono::Utc::now())
            .message("from peer")
            .build();
        front.register(record);
        assert_eq!(front.query().with_type("Remote").count(), 1);
    }

    #[test]
    fn test_replace_moves_everything() {
        let front = RegistryFront::in_memory();
        for n in 0..3 {
            front.capture(&io_failure(n));
        }

        let next = NamedBackend::new("forward");
        let previous = front.replace(next.clone());
        assert_eq!(previous.name(), "memory");
        assert_eq!(front.backend_name(), "forward");
        assert_eq!(next.len(), 6);
        assert_eq!(front.query().count(), 6);

        front.capture(&io_failure(9));
        assert_eq!(next.len(), 8);
        assert_eq!(previous.len(), 6);

        // records moved in snapshot order
        let moved: Vec<_> = next.query().to_list();
        let original = previous.query().to_list();
        for (a, b) in moved.iter().zip(&original) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_replace_with_current_is_noop() {
        let front = RegistryFront::in_memory();
        front.capture(&io_failure(1));

        let current = front.backend();
        let returned = front.replace(current.clone());
        assert!(same_backend(&returned, &current));
        assert_eq!(front.query().count(), 2);
    }

    #[test]
    fn test_swap_back_does_not_duplicate() {
        let front = RegistryFront::in_memory();
        front.capture(&io_failure(1));

        let original = front.replace(NamedBackend::new("forward"));
        front.capture(&io_failure(2));
        let forward = front.replace(original.clone());

        assert!(same_backend(&front.backend(), &original));
        assert_eq!(forward.len(), 4);
        assert_eq!(original.len(), 4);
        assert_eq!(front.query().without_parent().count(), 2);

        let all = front.query().to_list();
        for (i, a) in all.iter().enumerate() {
            assert!(all[i + 1..].iter().all(|b| !Arc::ptr_eq(a, b)));
        }
    }

    #[test]
    fn test_try_replace_times_out_while_captures_hold_lock() {
        let front = RegistryFront::in_memory();
        front.capture(&io_failure(1));

        let next = NamedBackend::new("forward");
        let reader = front.current.read();
        let result = front.try_replace_for(next.clone(), Duration::from_millis(20));
        drop(reader);

        assert!(matches!(result, Err(RegistryError::LockTimeout { .. })));
        assert_eq!(front.backend_name(), "memory");
        assert!(next.is_empty());
        assert_eq!(front.query().count(), 2);

        assert!(front.try_replace_for(next.clone(), Duration::from_millis(20)).is_ok());
        assert_eq!(front.backend_name(), "forward");
    }

    #[test]
    fn test_replace_bounded_uses_config() {
        let config = RegistryConfig::default().swap_timeout(Duration::from_millis(10));
        let front = RegistryFront::in_memory_with(config).unwrap();
        let reader = front.current.read();
        assert!(front.replace_bounded(NamedBackend::new("a")).is_err());
        drop(reader);
        assert!(front.replace_bounded(NamedBackend::new("a")).is_ok());

        let unbounded = RegistryFront::in_memory();
        assert!(unbounded.replace_bounded(NamedBackend::new("b")).is_ok());
        assert_eq!(unbounded.backend_name(), "b");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RegistryConfig::default().max_cause_depth(usize::MAX);
        assert!(matches!(
            RegistryFront::in_memory_with(config),
            Err(RegistryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_backend_panic_is_contained() {
        let front = RegistryFront::new(Arc::new(PanickingBackend));
        front.capture(&io_failure(1));
        assert_eq!(front.query().count(), 0);

        front.replace(Arc::new(MemoryBackend::new()));
        front.capture(&io_failure(2));
        assert_eq!(front.query().count(), 2);
    }

    #[test]
    fn test_captures_during_swaps_are_neither_lost_nor_duplicated() {
        const THREADS: u32 = 4;
        const PER_THREAD: u32 = 300;
        const SWAPS: usize = 20;

        let front = Arc::new(RegistryFront::in_memory());
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let front = Arc::clone(&front);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let err = TracedError::new("IOFailure", "burst").at(StackFrame::new("w", "write", t * PER_THREAD + i));
                        front.capture(&err);
                    }
                })
            })
            .collect();

        let swapper = {
            let front = Arc::clone(&front);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut swaps = 0;
                while swaps < SWAPS && !done.load(Ordering::Acquire) {
                    front.replace(Arc::new(MemoryBackend::new()));
                    swaps += 1;
                    thread::yield_now();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        swapper.join().unwrap();

        let all = front.query();
        let expected = (THREADS * PER_THREAD) as usize;
        assert_eq!(all.count(), expected);
        assert_eq!(all.distinct().len(), expected);
    }
}
