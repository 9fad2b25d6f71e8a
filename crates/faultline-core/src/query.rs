//! Lazy, composable queries over captured records
//!
//! A query pairs a fixed snapshot of records with a predicate. Filters
//! only compose predicates; nothing is evaluated until a terminal
//! operation (`for_each`, `collect`, `to_list`, ...) walks the snapshot.
//!
//! ```text
//! backend.query()          snapshot [r0 r1 r2 r3]   predicate: true
//!   .with_type("IO")                                 predicate: true ∧ type
//!   .without_parent()                                predicate: true ∧ type ∧ root
//!   .to_list()             ──▶ walk snapshot in order, keep matches
//! ```
//!
//! Backends only implement the two required trait methods. The
//! convenience filters and terminals live on `dyn ErrorQuery`, so every
//! backend's query gets them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::frame::StackFrame;
use crate::record::ErrorRecord;

/// Shared record predicate.
pub type Predicate = Arc<dyn Fn(&ErrorRecord) -> bool + Send + Sync>;

/// Push-style query contract.
pub trait ErrorQuery: Send + Sync {
    /// A new query matching this one's records AND `predicate`.
    /// The receiver is left unchanged.
    fn filter_with(&self, predicate: Predicate) -> Box<dyn ErrorQuery>;

    /// Visit every matching record in snapshot order.
    fn for_each(&self, visit: &mut dyn FnMut(&Arc<ErrorRecord>));
}

/// Accumulate/finish pair used by [`collect`](trait.ErrorQuery.html#method.collect).
pub trait Collector {
    type Acc;
    type Output;

    fn supply(&self) -> Self::Acc;
    fn accumulate(&self, acc: &mut Self::Acc, record: &Arc<ErrorRecord>);
    fn finish(self, acc: Self::Acc) -> Self::Output;
}

impl dyn ErrorQuery {
    pub fn filter<F>(&self, predicate: F) -> Box<dyn ErrorQuery>
    where
        F: Fn(&ErrorRecord) -> bool + Send + Sync + 'static,
    {
        self.filter_with(Arc::new(predicate))
    }

    /// Root records only.
    pub fn without_parent(&self) -> Box<dyn ErrorQuery> {
        self.filter(|r| !r.has_parent())
    }

    /// Records whose frames contain `frame`.
    pub fn includes_frame(&self, frame: StackFrame) -> Box<dyn ErrorQuery> {
        self.filter(move |r| r.includes_frame(&frame))
    }

    /// Records whose root frame is `frame`.
    pub fn with_root_frame(&self, frame: StackFrame) -> Box<dyn ErrorQuery> {
        self.filter(move |r| r.root() == Some(&frame))
    }

    /// Exact type-name match.
    pub fn with_type(&self, type_name: impl Into<String>) -> Box<dyn ErrorQuery> {
        let type_name = type_name.into();
        self.filter(move |r| r.type_name() == type_name)
    }

    pub fn with_message_containing(&self, text: impl Into<String>) -> Box<dyn ErrorQuery> {
        let text = text.into();
        self.filter(move |r| r.message().is_some_and(|m| m.contains(&text)))
    }

    /// Records with `from <= occurred_at < to`.
    pub fn occurred_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Box<dyn ErrorQuery> {
        self.filter(move |r| r.occurred_at() >= from && r.occurred_at() < to)
    }

    /// Fold the matching records through `collector`.
    pub fn collect<C: Collector>(&self, collector: C) -> C::Output {
        let mut acc = collector.supply();
        self.for_each(&mut |record| collector.accumulate(&mut acc, record));
        collector.finish(acc)
    }

    pub fn to_list(&self) -> Vec<Arc<ErrorRecord>> {
        self.collect(ToList)
    }

    pub fn count(&self) -> usize {
        self.collect(Counting)
    }

    pub fn first(&self) -> Option<Arc<ErrorRecord>> {
        let mut first = None;
        self.for_each(&mut |record| {
            if first.is_none() {
                first = Some(Arc::clone(record));
            }
        });
        first
    }

    /// Matching records with duplicates (equal identity) removed,
    /// first occurrence kept.
    pub fn distinct(&self) -> Vec<Arc<ErrorRecord>> {
        self.collect(Distinct)
    }
}

// ── Collectors ────────────────────────────────────────────────────

/// Records in snapshot order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToList;

impl Collector for ToList {
    type Acc = Vec<Arc<ErrorRecord>>;
    type Output = Vec<Arc<ErrorRecord>>;

    fn supply(&self) -> Self::Acc {
        Vec::new()
    }

    fn accumulate(&self, acc: &mut Self::Acc, record: &Arc<ErrorRecord>) {
        acc.push(Arc::clone(record));
    }

    fn finish(self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Number of matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counting;

impl Collector for Counting {
    type Acc = usize;
    type Output = usize;

    fn supply(&self) -> usize {
        0
    }

    fn accumulate(&self, acc: &mut usize, _record: &Arc<ErrorRecord>) {
        *acc += 1;
    }

    fn finish(self, acc: usize) -> usize {
        acc
    }
}

/// First occurrence of each distinct record, in snapshot order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Distinct;

impl Collector for Distinct {
    type Acc = (HashSet<Arc<ErrorRecord>>, Vec<Arc<ErrorRecord>>);
    type Output = Vec<Arc<ErrorRecord>>;

    fn supply(&self) -> Self::Acc {
        (HashSet::new(), Vec::new())
    }

    fn accumulate(&self, (seen, out): &mut Self::Acc, record: &Arc<ErrorRecord>) {
        if seen.insert(Arc::clone(record)) {
            out.push(Arc::clone(record));
        }
    }

    fn finish(self, (_, out): Self::Acc) -> Self::Output {
        out
    }
}

/// Records grouped by type name; each group in snapshot order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupByType;

impl Collector for GroupByType {
    type Acc = BTreeMap<String, Vec<Arc<ErrorRecord>>>;
    type Output = BTreeMap<String, Vec<Arc<ErrorRecord>>>;

    fn supply(&self) -> Self::Acc {
        BTreeMap::new()
    }

    fn accumulate(&self, acc: &mut Self::Acc, record: &Arc<ErrorRecord>) {
        acc.entry(record.type_name().to_string())
            .or_default()
            .push(Arc::clone(record));
    }

    fn finish(self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

// ── Snapshot query ────────────────────────────────────────────────

/// Query over a fixed slice of records taken at creation time.
///
/// Later captures never show up in an existing query; cloning or
/// filtering shares the snapshot.
#[derive(Clone)]
pub struct SnapshotQuery {
    records:   Arc<[Arc<ErrorRecord>]>,
    predicate: Option<Predicate>,
}

impl SnapshotQuery {
    pub fn new(records: impl Into<Arc<[Arc<ErrorRecord>]>>) -> Self {
        Self {
            records: records.into(),
            predicate: None,
        }
    }

    /// Size of the snapshot, before any filtering.
    pub fn snapshot_len(&self) -> usize {
        self.records.len()
    }
}

impl ErrorQuery for SnapshotQuery {
    fn filter_with(&self, predicate: Predicate) -> Box<dyn ErrorQuery> {
        let combined: Predicate = match &self.predicate {
            None => predicate,
            Some(current) => {
                let current = Arc::clone(current);
                Arc::new(move |r: &ErrorRecord| current(r) && predicate(r))
            }
        };
        Box::new(SnapshotQuery {
            records: Arc::clone(&self.records),
            predicate: Some(combined),
        })
    }

    fn for_each(&self, visit: &mut dyn FnMut(&Arc<ErrorRecord>)) {
        for record in self.records.iter() {
            let keep = match &self.predicate {
                Some(predicate) => predicate(record.as_ref()),
                None => true,
            };
            if keep {
                visit(record);
            }
        }
    }
}

impl std::fmt::Debug for SnapshotQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotQuery")
            .field("snapshot_len", &self.records.len())
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}
