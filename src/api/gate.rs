//! Hourly request ceiling.
//!
//! The LMS enforces a per-hour quota without reliable headers, so every
//! outbound call takes a slot here first. When the window is full the
//! caller sleeps until the oldest slot expires; the gate never errors.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

/// One hour.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Sliding-window request counter.
#[derive(Debug)]
pub struct RateGate {
    limit: usize,
    window: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

/// Point-in-time view of gate usage.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub used: usize,
    pub limit: usize,
    pub window_secs: u64,
    /// Milliseconds until the oldest slot frees up (0 when a slot is free).
    pub next_slot_in_ms: u64,
}

impl RateGate {
    /// Create a gate allowing `limit` reservations per `window`. A limit of 0 is treated as 1.
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            slots: Mutex::new(VecDeque::with_capacity(limit.min(4096))),
        }
    }

    /// Create a gate with a one-hour window.
    pub fn hourly(limit: usize) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until a slot is available, then take it.
    ///
    /// The lock is held while sleeping, so concurrent callers queue up
    /// behind the sleeper in FIFO order and the ceiling is never exceeded.
    pub async fn reserve(&self) {
        let mut slots = self.slots.lock().await;

        let now = Instant::now();
        evict(&mut slots, now, self.window);

        if slots.len() >= self.limit {
            let oldest = slots.front().copied().unwrap_or(now);
            let wait = (oldest + self.window).saturating_duration_since(now);
            tracing::warn!(
                wait_secs = wait.as_secs(),
                limit = self.limit,
                "Hourly request ceiling reached, waiting for window"
            );
            sleep(wait).await;
            evict(&mut slots, Instant::now(), self.window);
        }

        slots.push_back(Instant::now());
    }

    /// Non-blocking usage snapshot. Returns `None` if a reservation holds the lock.
    pub fn snapshot(&self) -> Option<GateSnapshot> {
        let mut slots = self.slots.try_lock().ok()?;
        let now = Instant::now();
        evict(&mut slots, now, self.window);

        let next_slot_in_ms = if slots.len() >= self.limit {
            slots
                .front()
                .map(|&oldest| (oldest + self.window).saturating_duration_since(now).as_millis() as u64)
                .unwrap_or(0)
        } else {
            0
        };

        Some(GateSnapshot {
            used: slots.len(),
            limit: self.limit,
            window_secs: self.window.as_secs(),
            next_slot_in_ms,
        })
    }
}

fn evict(slots: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while slots.front().is_some_and(|&t| now.saturating_duration_since(t) >= window) {
        slots.pop_front();
    }
}
