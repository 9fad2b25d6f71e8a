//! Stress test - concurrent captures across backend swaps
//!
//! Writer threads capture distinct errors as fast as they can while a
//! swapper thread keeps replacing the backend. At the end every capture
//! must be present exactly once.
//!
//! Usage: `stress [threads] [captures-per-thread] [swaps]`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use faultline::{Backend, MemoryBackend, RegistryConfig, RegistryFront, StackFrame, TracedError};
use tracing::{error, info};

fn arg(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== faultline Stress Test ===\n");

    let threads = arg(1, 8);
    let per_thread = arg(2, 20_000);
    let swaps = arg(3, 50);
    let expected = threads * per_thread;

    let config = RegistryConfig::from_env();
    let front = match RegistryFront::in_memory_with(config) {
        Ok(front) => Arc::new(front),
        Err(err) => {
            error!(error = %err, "bad configuration");
            std::process::exit(2);
        }
    };

    println!("{threads} writers x {per_thread} captures, {swaps} swaps");

    let done = Arc::new(AtomicBool::new(false));
    let swapped = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let writers: Vec<_> = (0..threads)
        .map(|t| {
            let front = Arc::clone(&front);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let err = TracedError::new("StressFailure", "burst")
                        .at(StackFrame::new(format!("writer{t}"), "capture", i as u32));
                    front.capture(&err);
                }
            })
        })
        .collect();

    let swapper = {
        let front = Arc::clone(&front);
        let done = Arc::clone(&done);
        let swapped = Arc::clone(&swapped);
        thread::spawn(move || {
            while swapped.load(Ordering::Relaxed) < swaps && !done.load(Ordering::Acquire) {
                let next: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
                front.replace(next);
                swapped.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for writer in writers {
        if writer.join().is_err() {
            error!("writer thread panicked");
        }
    }
    let capture_time = start.elapsed();
    done.store(true, Ordering::Release);
    if swapper.join().is_err() {
        error!("swapper thread panicked");
    }

    let all = front.query();
    let held = all.count();
    let distinct = all.distinct().len();

    println!("\nCapture time: {capture_time:?}");
    println!(
        "Capture rate: {:.0} captures/sec",
        expected as f64 / capture_time.as_secs_f64()
    );
    println!("Swaps done:   {}", swapped.load(Ordering::Relaxed));
    println!("Records:      {held} held, {distinct} distinct, {expected} expected");

    if held == expected && distinct == expected {
        info!(held, "no capture lost or duplicated");
        println!("\n=== Stress Test PASSED ===");
    } else {
        error!(held, distinct, expected, "capture count mismatch");
        println!("\n=== Stress Test FAILED ===");
        std::process::exit(1);
    }
}
