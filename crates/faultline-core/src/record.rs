//! Captured error records
//!
//! An [`ErrorRecord`] is the immutable snapshot of one raised error:
//! identity, type, message, timestamp and frames, plus two links:
//!
//! ```text
//!   root ──cause──▶ C1 ──cause──▶ C2        recursive linkage
//!    ▲               │             │        (each cause's parent is the
//!    └────parent─────┘   ◀─parent──┘         record whose cause it is)
//! ```
//!
//! [`expand`] additionally produces the flat registration used by
//! backends: the root, then every cause and every suppressed companion of
//! a cause, each captured with the root as its parent.
//!
//! Records are shared as `Arc<ErrorRecord>`. Parent links are `Weak`
//! since parent and cause point at each other.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::frame::StackFrame;
use crate::raised::{RaisedError, SourceId};

/// One captured error. Identity is `(source_id, type_name, root frame)`.
pub struct ErrorRecord {
    parent:      Option<Weak<ErrorRecord>>,
    source_id:   SourceId,
    type_name:   String,
    occurred_at: DateTime<Utc>,
    message:     Option<String>,
    cause:       OnceLock<Arc<ErrorRecord>>,
    frames:      Vec<StackFrame>,
}

impl ErrorRecord {
    /// Build the record for `error` and, link by link, its cause chain.
    ///
    /// The chain stops after `max_depth` causes or when an error repeats.
    /// An error without frames still yields a record; see
    /// [`is_complete`](Self::is_complete).
    pub fn capture(
        error: RaisedError<'_>,
        parent: Option<&Arc<ErrorRecord>>,
        now: DateTime<Utc>,
        max_depth: usize,
    ) -> Arc<ErrorRecord> {
        let root = Arc::new(Self::node(parent.map(Arc::downgrade), error, now));
        if root.frames.is_empty() {
            debug!(type_name = %root.type_name, "captured error carries no stack frames");
        }

        let mut current = Arc::clone(&root);
        for cause in CauseChain::new(error, max_depth) {
            let record = Arc::new(Self::node(Some(Arc::downgrade(&current)), cause, now));
            let _ = current.cause.set(Arc::clone(&record));
            current = record;
        }
        root
    }

    /// Start a record that did not come from a live error, e.g. one relayed
    /// from another process.
    pub fn relayed(
        source_id: SourceId,
        type_name: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> RecordBuilder {
        RecordBuilder {
            source_id,
            type_name: type_name.into(),
            occurred_at,
            message: None,
            frames: Vec::new(),
            cause: None,
        }
    }

    fn node(parent: Option<Weak<ErrorRecord>>, error: RaisedError<'_>, now: DateTime<Utc>) -> Self {
        Self {
            parent,
            source_id:   error.identity(),
            type_name:   error.type_name(),
            occurred_at: now,
            message:     error.message(),
            cause:       OnceLock::new(),
            frames:      error.frames().to_vec(),
        }
    }

    /// The record that triggered this one's capture.
    ///
    /// `None` for roots, and for children whose parent has been dropped.
    pub fn parent(&self) -> Option<Arc<ErrorRecord>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this record was captured under a parent.
    #[inline]
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    #[inline]
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&Arc<ErrorRecord>> {
        self.cause.get()
    }

    /// Causes below this record, nearest first.
    pub fn causes(&self) -> impl Iterator<Item = &Arc<ErrorRecord>> + '_ {
        std::iter::successors(self.cause(), |r| r.cause())
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The innermost frame. `None` for records captured without frames.
    #[inline]
    pub fn root(&self) -> Option<&StackFrame> {
        self.frames.first()
    }

    /// False when no frames could be captured, which leaves the record
    /// without a root frame.
    #[inline]
    pub fn is_complete(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn includes_frame(&self, frame: &StackFrame) -> bool {
        self.frames.contains(frame)
    }
}

impl PartialEq for ErrorRecord {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.type_name == other.type_name
            && self.root() == other.root()
    }
}

impl Eq for ErrorRecord {}

impl Hash for ErrorRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_id.hash(state);
        self.type_name.hash(state);
        self.root().hash(state);
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        if let Some(root) = self.root() {
            write!(f, " at {}", root)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ErrorRecord");
        d.field("source_id", &self.source_id);
        d.field("type_name", &self.type_name);
        d.field("occurred_at", &self.occurred_at);
        if let Some(msg) = &self.message {
            d.field("message", msg);
        }
        if let Some(root) = self.root() {
            d.field("root", &format_args!("{}", root));
        }
        d.field("frames", &self.frames.len());
        d.field("has_parent", &self.has_parent());
        if let Some(cause) = self.cause() {
            d.field("cause", &cause.type_name);
        }
        d.finish()
    }
}

/// Builder for records that are not captured from a live error.
#[derive(Debug)]
pub struct RecordBuilder {
    source_id:   SourceId,
    type_name:   String,
    occurred_at: DateTime<Utc>,
    message:     Option<String>,
    frames:      Vec<StackFrame>,
    cause:       Option<Box<RecordBuilder>>,
}

impl RecordBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn frames(mut self, frames: impl IntoIterator<Item = StackFrame>) -> Self {
        self.frames = frames.into_iter().collect();
        self
    }

    /// Append a cause below the deepest one already attached.
    pub fn cause(mut self, cause: RecordBuilder) -> Self {
        self.append_cause(cause);
        self
    }

    fn append_cause(&mut self, cause: RecordBuilder) {
        match &mut self.cause {
            Some(existing) => existing.append_cause(cause),
            None => self.cause = Some(Box::new(cause)),
        }
    }

    /// Finish a root record.
    pub fn build(self) -> Arc<ErrorRecord> {
        self.build_with(None)
    }

    /// Finish a record captured under `parent`.
    pub fn build_under(self, parent: &Arc<ErrorRecord>) -> Arc<ErrorRecord> {
        self.build_with(Some(Arc::downgrade(parent)))
    }

    fn build_with(self, parent: Option<Weak<ErrorRecord>>) -> Arc<ErrorRecord> {
        let RecordBuilder { source_id, type_name, occurred_at, message, frames, cause } = self;
        let record = Arc::new(ErrorRecord {
            parent,
            source_id,
            type_name,
            occurred_at,
            message,
            cause: OnceLock::new(),
            frames,
        });
        if let Some(cause) = cause {
            let child = (*cause).build_with(Some(Arc::downgrade(&record)));
            let _ = record.cause.set(child);
        }
        record
    }
}

// ── Cause-chain walk ──────────────────────────────────────────────

/// Iterator over the causes of an error, nearest first.
///
/// Stops after `max_depth` causes, or when an error it already yielded
/// (same identity and type) comes around again.
struct CauseChain<'a> {
    next:      Option<RaisedError<'a>>,
    seen:      HashSet<(SourceId, String)>,
    remaining: usize,
    truncated: bool,
}

impl<'a> CauseChain<'a> {
    fn new(error: RaisedError<'a>, max_depth: usize) -> Self {
        let mut seen = HashSet::new();
        seen.insert((error.identity(), error.type_name()));
        Self {
            next: error.cause(),
            seen,
            remaining: max_depth,
            truncated: false,
        }
    }
}

impl<'a> Iterator for CauseChain<'a> {
    type Item = RaisedError<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let cause = self.next.take()?;
        if self.remaining == 0 {
            debug!(type_name = %cause.type_name(), "cause chain truncated at depth limit");
            self.truncated = true;
            return None;
        }
        if !self.seen.insert((cause.identity(), cause.type_name())) {
            debug!(type_name = %cause.type_name(), "cause chain loops back, truncated");
            self.truncated = true;
            return None;
        }
        self.remaining -= 1;
        self.next = cause.cause();
        Some(cause)
    }
}

/// Flatten one raised error into the records a backend registers.
///
/// Yields the root first, then for each cause in the chain the cause
/// itself followed by its suppressed companions. Everything but the root
/// is captured with the root as parent.
pub fn expand(error: RaisedError<'_>, now: DateTime<Utc>, max_depth: usize) -> Vec<Arc<ErrorRecord>> {
    let root = ErrorRecord::capture(error, None, now, max_depth);
    let mut records = vec![Arc::clone(&root)];

    let mut chain = CauseChain::new(error, max_depth);
    for cause in chain.by_ref() {
        records.push(ErrorRecord::capture(cause, Some(&root), now, max_depth));
        for suppressed in cause.suppressed() {
            records.push(ErrorRecord::capture(suppressed, Some(&root), now, max_depth));
        }
    }
    if chain.truncated {
        warn!(
            type_name = %root.type_name(),
            records = records.len(),
            max_depth,
            "cause chain truncated during capture"
        );
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_CAUSE_DEPTH;
    use crate::raised::TracedError;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn frame(method: &str, line: u32) -> StackFrame {
        StackFrame::new("app::disk", method, line)
    }

    fn io_failure() -> TracedError {
        TracedError::new("IOFailure", "disk full")
            .with_frames([frame("write", 10), frame("flush", 20)])
            .with_source(
                TracedError::new("DeviceError", "sector 7")
                    .with_frames([frame("read_sector", 5)])
                    .with_suppressed(TracedError::new("CloseFailure", "fd leak").at(frame("close", 1)))
                    .with_source(TracedError::of_type("BusError").at(frame("bus", 2))),
            )
    }

    #[test]
    fn test_capture_reads_value() {
        let err = io_failure();
        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), DEFAULT_MAX_CAUSE_DEPTH);

        assert_eq!(record.type_name(), "IOFailure");
        assert_eq!(record.message(), Some("disk full"));
        assert_eq!(record.occurred_at(), now());
        assert_eq!(record.root(), Some(&frame("write", 10)));
        assert_eq!(record.frames().len(), 2);
        assert_eq!(record.source_id(), err.source_id());
        assert!(!record.has_parent());
        assert!(record.is_complete());
    }

    #[test]
    fn test_capture_links_causes_recursively() {
        let err = io_failure();
        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), DEFAULT_MAX_CAUSE_DEPTH);

        let types: Vec<_> = record.causes().map(|c| c.type_name().to_string()).collect();
        assert_eq!(types, ["DeviceError", "BusError"]);

        let device = record.cause().unwrap();
        assert_eq!(device.parent().as_ref(), Some(&record));
        let bus = device.cause().unwrap();
        assert_eq!(bus.parent().as_ref(), Some(device));
        assert_eq!(bus.message(), None);
    }

    #[test]
    fn test_equality_is_identity_type_and_root() {
        let err = io_failure();
        let a = ErrorRecord::capture(RaisedError::of(&err), None, now(), 8);
        let later = now() + chrono::Duration::seconds(60);
        let b = ErrorRecord::capture(RaisedError::of(&err), None, later, 8);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(Arc::clone(&a));
        assert!(!set.insert(b));

        // same type, message and frames, different error value
        let twin = io_failure();
        let c = ErrorRecord::capture(RaisedError::of(&twin), None, now(), 8);
        assert_ne!(a, c);
    }

    #[test]
    fn test_capture_without_frames_is_partial() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "plain");
        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), 8);
        assert!(!record.is_complete());
        assert!(record.root().is_none());
        assert_eq!(record.message(), Some("plain"));
    }

    #[test]
    fn test_expand_flattens_under_root() {
        let err = io_failure();
        let records = expand(RaisedError::of(&err), now(), DEFAULT_MAX_CAUSE_DEPTH);

        let types: Vec<_> = records.iter().map(|r| r.type_name()).collect();
        assert_eq!(types, ["IOFailure", "DeviceError", "CloseFailure", "BusError"]);

        let root = &records[0];
        assert!(!root.has_parent());
        for child in &records[1..] {
            assert_eq!(child.parent().as_ref(), Some(root));
        }
        // flattened causes keep their own recursive chain
        assert_eq!(records[1].cause().map(|c| c.type_name()), Some("BusError"));
    }

    #[test]
    fn test_expand_chain_depth_produces_n_plus_one() {
        let mut err = TracedError::new("Level0", "bottom").at(frame("l0", 0));
        for depth in 1..=5 {
            err = TracedError::new(format!("Level{depth}"), "up")
                .at(frame("l", depth))
                .with_source(err);
        }
        let records = expand(RaisedError::of(&err), now(), DEFAULT_MAX_CAUSE_DEPTH);
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn test_depth_limit_truncates() {
        let mut err = TracedError::of_type("Level0");
        for depth in 1..=10 {
            err = TracedError::of_type(format!("Level{depth}")).with_source(err);
        }
        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), 3);
        assert_eq!(record.causes().count(), 3);

        let records = expand(RaisedError::of(&err), now(), 3);
        assert_eq!(records.len(), 4);
    }

    #[derive(Debug)]
    struct Loop {
        id: u32,
    }

    impl fmt::Display for Loop {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "loop {}", self.id)
        }
    }

    impl std::error::Error for Loop {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(self)
        }
    }

    #[test]
    fn test_self_sourcing_error_is_recorded_once() {
        let err = Loop { id: 1 };

        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), DEFAULT_MAX_CAUSE_DEPTH);
        assert_eq!(record.type_name(), "Loop");
        assert!(record.cause().is_none());

        let records = expand(RaisedError::of(&err), now(), DEFAULT_MAX_CAUSE_DEPTH);
        assert_eq!(records.len(), 1);
        assert!(!records[0].has_parent());
    }

    #[test]
    fn test_relayed_record() {
        let parent = ErrorRecord::relayed(SourceId::Token(u64::MAX), "RemoteFailure", now())
            .message("from client")
            .frames([frame("remote", 3)])
            .cause(ErrorRecord::relayed(SourceId::Token(u64::MAX - 1), "RemoteCause", now()))
            .build();
        assert_eq!(parent.type_name(), "RemoteFailure");
        assert_eq!(parent.root(), Some(&frame("remote", 3)));
        let cause = parent.cause().unwrap();
        assert_eq!(cause.parent().as_ref(), Some(&parent));

        let child = ErrorRecord::relayed(SourceId::Token(7), "Child", now()).build_under(&parent);
        assert!(child.has_parent());
    }

    #[test]
    fn test_display() {
        let err = io_failure();
        let record = ErrorRecord::capture(RaisedError::of(&err), None, now(), 0);
        assert_eq!(record.to_string(), "IOFailure: disk full at app::disk.write:10");
        assert!(record.cause().is_none());
    }
}
