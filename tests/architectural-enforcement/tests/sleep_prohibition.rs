//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread with `std::thread::sleep`.
//! Async sleeps are allowed only where waiting is the behaviour itself:
//! retry backoff (`retry.rs`) and backpressure yields (`backpressure.rs`).
//! Everything else waits on I/O, channels, or cancellation.

use std::path::Path;

use architectural_enforcement::scan;

/// Files allowed to call `tokio::time::sleep`
const SLEEP_ALLOWED: &[&str] = &["retry.rs", "backpressure.rs"];

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

#[test]
fn test_no_blocking_sleep_in_production_code() {
    let violations = scan(|_, code| code.contains("thread::sleep"));

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking sleep found in production code:\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        panic!("Found {} blocking sleep call(s)", violations.len());
    }
}

#[test]
fn test_async_sleep_only_in_backoff_and_backpressure() {
    let violations = scan(|path: &Path, code| {
        let allowed = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| SLEEP_ALLOWED.contains(&name));
        is_sleep_call(code) && !allowed
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls outside retry/backpressure:\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        eprintln!("\n✅ Wait on I/O, channels, or a CancellationToken instead.");
        panic!("Found {} misplaced sleep call(s)", violations.len());
    }
}
