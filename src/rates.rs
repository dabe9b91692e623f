//! Rate derivation for the cumulative server counters.
//!
//! This module is the single source of truth for turning two snapshots of
//! the monotonically increasing pg_stat_database counters into per-second
//! rates. Samples must be fed in non-decreasing timestamp order; anything
//! older than the stored baseline is discarded.

use serde::{Deserialize, Serialize};

use crate::models::{ServerCounters, StatsSnapshot};

// ---------------------------------------------------------------------------
// Rate records
// ---------------------------------------------------------------------------

/// Per-second rates for the four cumulative counters.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct CounterRates {
    pub commits_s: f64,
    pub rollbacks_s: f64,
    pub blocks_read_s: f64,
    pub blocks_hit_s: f64,
}

/// One snapshot together with its derived rates.
///
/// The first sample of a session carries all-zero rates; there is nothing
/// to difference against yet.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RateSample {
    pub snapshot: StatsSnapshot,
    /// Capture time of `snapshot` (seconds since Unix epoch).
    pub timestamp: i64,
    pub rates: CounterRates,
}

// ---------------------------------------------------------------------------
// Delta helper
// ---------------------------------------------------------------------------

/// Per-second rate for one counter, clamped to zero on regression.
///
/// A current value below the previous one means the counter was reset
/// (server restart, stats reset); the rate is zero rather than a negative
/// spike.
fn counter_rate(curr: i64, prev: i64, dt: f64) -> f64 {
    if curr >= prev {
        (curr - prev) as f64 / dt
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Rate state
// ---------------------------------------------------------------------------

/// Baseline retained between polling cycles.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    timestamp: i64,
    counters: ServerCounters,
    rates: CounterRates,
}

/// Rate tracking state for one dashboard session.
#[derive(Debug, Default)]
pub struct RateState {
    prev: Option<Baseline>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a snapshot into the state and returns its derived rates.
    ///
    /// Returns `None` when the snapshot is strictly older than the stored
    /// baseline; the caller must drop such samples (out-of-order delivery)
    /// and the state is left untouched. A snapshot with the same timestamp
    /// as the baseline returns the previous rates unchanged, so a duplicate
    /// tick never divides by zero.
    pub fn update(&mut self, snapshot: &StatsSnapshot) -> Option<CounterRates> {
        let ts = snapshot.captured_at;
        let counters = snapshot.counters;

        let Some(prev) = self.prev else {
            let rates = CounterRates::default();
            self.prev = Some(Baseline {
                timestamp: ts,
                counters,
                rates,
            });
            return Some(rates);
        };

        if ts < prev.timestamp {
            return None;
        }

        if ts == prev.timestamp {
            return Some(prev.rates);
        }

        let dt = (ts - prev.timestamp) as f64;
        let rates = CounterRates {
            commits_s: counter_rate(counters.commits, prev.counters.commits, dt),
            rollbacks_s: counter_rate(counters.rollbacks, prev.counters.rollbacks, dt),
            blocks_read_s: counter_rate(counters.blocks_read, prev.counters.blocks_read, dt),
            blocks_hit_s: counter_rate(counters.blocks_hit, prev.counters.blocks_hit, dt),
        };

        self.prev = Some(Baseline {
            timestamp: ts,
            counters,
            rates,
        });

        Some(rates)
    }

    /// Forgets the baseline; the next sample starts a fresh session.
    pub fn reset(&mut self) {
        self.prev = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
