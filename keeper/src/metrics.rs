//! Keeper counters, served as JSON on `/metrics`.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated keeper metrics.
///
/// Thread-safe via atomics; shared as `Arc<Metrics>`.
pub struct Metrics {
    /// Upkeep checks simulated.
    pub upkeep_checks: AtomicU64,
    /// `perform_upkeep` transactions confirmed.
    pub upkeeps_performed: AtomicU64,
    /// `perform_upkeep` attempts rejected with `UpkeepNotNeeded`.
    pub upkeeps_skipped: AtomicU64,
    /// Upkeep iterations that failed for any other reason.
    pub upkeep_failures: AtomicU64,
    /// Sum of `perform_upkeep` confirmation latencies in milliseconds.
    pub upkeep_latency_sum_ms: AtomicU64,

    /// `RaffleEntered` events observed.
    pub entries_observed: AtomicU64,
    /// Lamports entered, summed over `RaffleEntered` events.
    pub lamports_entered: AtomicU64,
    /// `RequestedRaffleWinner` events observed.
    pub draws_requested: AtomicU64,
    /// `WinnerPicked` events observed.
    pub winners_picked: AtomicU64,
    /// Lamports paid out, summed over `WinnerPicked` events.
    pub lamports_paid: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            upkeep_checks: AtomicU64::new(0),
            upkeeps_performed: AtomicU64::new(0),
            upkeeps_skipped: AtomicU64::new(0),
            upkeep_failures: AtomicU64::new(0),
            upkeep_latency_sum_ms: AtomicU64::new(0),
            entries_observed: AtomicU64::new(0),
            lamports_entered: AtomicU64::new(0),
            draws_requested: AtomicU64::new(0),
            winners_picked: AtomicU64::new(0),
            lamports_paid: AtomicU64::new(0),
        }
    }

    pub fn record_check(&self) {
        self.upkeep_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a confirmed `perform_upkeep` with its latency.
    pub fn record_upkeep(&self, latency_ms: u64) {
        self.upkeeps_performed.fetch_add(1, Ordering::Relaxed);
        self.upkeep_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.upkeeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.upkeep_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry(&self, amount: u64) {
        self.entries_observed.fetch_add(1, Ordering::Relaxed);
        self.lamports_entered.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_draw_requested(&self) {
        self.draws_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_winner(&self, prize: u64) {
        self.winners_picked.fetch_add(1, Ordering::Relaxed);
        self.lamports_paid.fetch_add(prize, Ordering::Relaxed);
    }

    /// Average `perform_upkeep` latency in milliseconds, or 0 if none.
    pub fn avg_upkeep_latency_ms(&self) -> u64 {
        let count = self.upkeeps_performed.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.upkeep_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "upkeep_checks": self.upkeep_checks.load(Ordering::Relaxed),
            "upkeeps_performed": self.upkeeps_performed.load(Ordering::Relaxed),
            "upkeeps_skipped": self.upkeeps_skipped.load(Ordering::Relaxed),
            "upkeep_failures": self.upkeep_failures.load(Ordering::Relaxed),
            "avg_upkeep_latency_ms": self.avg_upkeep_latency_ms(),
            "entries_observed": self.entries_observed.load(Ordering::Relaxed),
            "lamports_entered": self.lamports_entered.load(Ordering::Relaxed),
            "draws_requested": self.draws_requested.load(Ordering::Relaxed),
            "winners_picked": self.winners_picked.load(Ordering::Relaxed),
            "lamports_paid": self.lamports_paid.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
