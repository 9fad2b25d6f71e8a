//! Basic faultline example
//!
//! Captures a few error chains, queries them, then swaps the process
//! backend for a forwarding one and keeps capturing.
//!
//! # Environment Variables
//!
//! - `RUST_LOG=faultline_core=debug` - Show capture/swap logging
//! - `FAULTLINE_MAX_CAUSE_DEPTH=<n>` - Longest cause chain followed per capture

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use faultline::{
    here, traced, Backend, ErrorQuery, ErrorRecord, GroupByType, MemoryBackend, RegistryConfig,
    TracedError,
};
use tracing::info;

// RUST_LOG=faultline_core=debug cargo run -p faultline-basic
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("basic=info".parse()?),
        )
        .init();

    println!("=== faultline Basic Example ===\n");

    let registry = faultline::init(RegistryConfig::from_env())?;

    // A traced chain: IOFailure <- DeviceError (+ suppressed CloseFailure)
    if let Err(err) = flush_journal() {
        println!("flush failed: {err}");
        faultline::capture(&err);
    }

    // A plain std error: recorded without frames
    if let Err(err) = "forty-two".parse::<u32>() {
        faultline::capture(&err);
    }

    // Same error captured twice gives equal records
    let repeat = traced!("Timeout", "peer did not answer");
    faultline::capture(&repeat);
    faultline::capture(&repeat);

    let all = faultline::query();
    println!("captured {} records, {} roots", all.count(), all.without_parent().count());
    for record in all.without_parent().to_list() {
        let status = if record.is_complete() { "complete" } else { "partial" };
        println!("  {record}  [{status}]");
        for cause in record.causes() {
            println!("    caused by {cause}");
        }
    }

    let groups = all.collect(GroupByType);
    println!("\nby type:");
    for (type_name, records) in &groups {
        println!("  {type_name:<32} {}", records.len());
    }
    println!("distinct: {}", all.distinct().len());

    // Swap to a forwarding backend; everything held so far moves with it
    let forward = Arc::new(Forwarding::new("collector"));
    let previous = faultline::replace_backend(forward.clone())?;
    println!(
        "\nswapped {} -> {} ({} records forwarded)",
        previous.name(),
        registry.backend_name(),
        forward.forwarded()
    );

    faultline::capture(&traced!("IOFailure", "disk full again"));
    println!(
        "after swap: {} forwarded, {} held, old backend still {}",
        forward.forwarded(),
        faultline::query().count(),
        previous.len()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}

fn flush_journal() -> Result<(), TracedError> {
    let device = TracedError::new("DeviceError", "sector 7 unreadable")
        .at(here!())
        .with_suppressed(TracedError::new("CloseFailure", "fd 12 leaked").at(here!()));
    Err(traced!("IOFailure", "journal flush failed", source = device))
}

/// Backend that keeps records locally and counts what passes through,
/// standing in for one that ships records to a remote collector.
struct Forwarding {
    name:      &'static str,
    local:     MemoryBackend,
    forwarded: AtomicUsize,
}

impl Forwarding {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            local: MemoryBackend::new(),
            forwarded: AtomicUsize::new(0),
        }
    }

    fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::Relaxed)
    }
}

impl Backend for Forwarding {
    fn register(&self, record: Arc<ErrorRecord>) {
        info!(target: "basic", record = %record, "forwarding");
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.local.register(record);
    }

    fn query(&self) -> Box<dyn ErrorQuery> {
        self.local.query()
    }

    fn name(&self) -> &str {
        self.name
    }
}
