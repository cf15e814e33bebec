//! ID generation utilities for lmsflow
//!
//! Provides functions for generating identifiers for scheduled calls and pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

static CALL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique call ID
///
/// Format: `call-{sequence}-{random_hex}`
/// Example: `call-000017-a1b2`
///
/// The sequence is process-wide, so two IDs never collide within a process.
pub fn generate_call_id() -> String {
    let seq = CALL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random: u16 = rand::rng().random();
    format!("call-{:06}-{:04x}", seq, random)
}

/// Generate a pipeline run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("run-{}-{:08x}", timestamp, random)
}
