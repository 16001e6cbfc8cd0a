// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trust scoring engine for Moat capability reliability.
//!
//! [`StatsStore`] ingests outcome events and maintains rolling
//! per-capability statistics: 7-day success rate and p95 latency computed
//! from recent events. Two signals derive from the stats:
//!
//! * [`should_hide`] — success rate below the threshold over the trailing
//!   window, warranting suppression from marketplace listings.
//! * [`should_throttle`] — p95 latency above the threshold, warranting
//!   automatic request throttling at the gateway.
//!
//! Events live in memory in per-capability deques bounded by the 7-day
//! window; expired events are pruned on each write. A production
//! deployment would back this with a time-series store.

#![deny(unsafe_code)]

pub mod api;
pub mod config;

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

const WINDOW_DAYS: i64 = 7;

/// Minimum events in the window before hide/throttle signals may fire.
pub const MIN_EVENTS_FOR_SIGNALS: usize = 5;

/// Minimum events in the window before a capability can be verified.
pub const MIN_EVENTS_FOR_VERIFIED: usize = 10;

/// Single outcome event recorded for a capability.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Capability the event belongs to.
    pub capability_id: String,
    /// Whether the execution succeeded.
    pub success: bool,
    /// End-to-end latency in milliseconds.
    pub latency_ms: f64,
    /// When the execution occurred.
    pub occurred_at: DateTime<Utc>,
    /// Tenant that triggered the execution.
    pub tenant_id: String,
    /// Receipt the event was derived from.
    pub receipt_id: String,
}

/// Computed reliability stats for a single capability.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityStats {
    /// Capability the stats describe.
    pub capability_id: String,
    /// Success rate over the trailing window, 0.0..=1.0.
    pub success_rate_7d: f64,
    /// Linearly-interpolated 95th-percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// Number of events in the trailing window.
    pub total_executions_7d: usize,
    /// Timestamp of the most recent event, if any.
    pub last_checked: Option<DateTime<Utc>>,
    /// Whether the capability has earned verified status.
    pub verified: bool,
}

/// Reliability thresholds, configurable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Success-rate floor for hide/verified decisions (default 0.80).
    pub min_success_rate_7d: f64,
    /// p95 latency ceiling for throttle decisions (default 10 000 ms).
    pub max_p95_latency_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_success_rate_7d: 0.80,
            max_p95_latency_ms: 10_000.0,
        }
    }
}

/// In-memory rolling-window stats store.
///
/// Reads are stateless snapshots; writes are serialized per store, which
/// keeps per-capability event order stable.
pub struct StatsStore {
    events: Mutex<HashMap<String, VecDeque<EventRecord>>>,
    thresholds: Thresholds,
}

impl StatsStore {
    /// Create a store with the given thresholds.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            thresholds,
        }
    }

    /// Thresholds this store evaluates signals against.
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Ingest a new outcome event, pruning events older than the window.
    pub fn record(&self, event: EventRecord) {
        let mut events = self.events.lock().expect("event log lock poisoned");
        let queue = events.entry(event.capability_id.clone()).or_default();
        let capability_id = event.capability_id.clone();
        let success = event.success;
        let latency_ms = event.latency_ms;
        queue.push_back(event);
        prune(queue);
        debug!(
            capability_id,
            success,
            latency_ms,
            window_size = queue.len(),
            "event recorded"
        );
    }

    /// Compute current reliability stats for `capability_id`.
    ///
    /// With zero recorded events the capability gets the benefit of the
    /// doubt: success rate 1.0, p95 0, not verified.
    pub fn get_stats(&self, capability_id: &str) -> CapabilityStats {
        let mut events = self.events.lock().expect("event log lock poisoned");
        let window: Vec<EventRecord> = match events.get_mut(capability_id) {
            Some(queue) => {
                prune(queue);
                queue.iter().cloned().collect()
            }
            None => Vec::new(),
        };
        drop(events);

        let total = window.len();
        if total == 0 {
            return CapabilityStats {
                capability_id: capability_id.to_string(),
                success_rate_7d: 1.0,
                p95_latency_ms: 0.0,
                total_executions_7d: 0,
                last_checked: None,
                verified: false,
            };
        }

        let successes = window.iter().filter(|e| e.success).count();
        let success_rate = successes as f64 / total as f64;

        let mut latencies: Vec<f64> = window.iter().map(|e| e.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
        let p95 = percentile(&latencies, 95.0);

        let verified = total >= MIN_EVENTS_FOR_VERIFIED
            && success_rate >= self.thresholds.min_success_rate_7d;

        let last_checked = window.iter().map(|e| e.occurred_at).max();

        CapabilityStats {
            capability_id: capability_id.to_string(),
            success_rate_7d: success_rate,
            p95_latency_ms: p95,
            total_executions_7d: total,
            last_checked,
            verified,
        }
    }

    /// IDs of every capability with at least one recorded event.
    pub fn all_capability_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .events
            .lock()
            .expect("event log lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Total events currently inside the rolling window.
    pub fn total_events_in_window(&self) -> usize {
        self.all_capability_ids()
            .iter()
            .map(|id| self.get_stats(id).total_executions_7d)
            .sum()
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

fn prune(queue: &mut VecDeque<EventRecord>) {
    let cutoff = Utc::now() - Duration::days(WINDOW_DAYS);
    while queue.front().is_some_and(|e| e.occurred_at < cutoff) {
        queue.pop_front();
    }
}

/// Compute the `pct`-th percentile of a **sorted** slice using linear
/// interpolation, clamping at the boundaries.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let k = (sorted.len() - 1) as f64 * pct / 100.0;
    let lo = k.floor() as usize;
    let hi = lo + 1;
    if hi >= sorted.len() {
        return sorted[sorted.len() - 1];
    }
    let frac = k - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Whether the capability should be hidden from marketplace listings.
///
/// Fires only with enough data (≥ 5 executions) and a success rate below
/// the threshold over the trailing window.
pub fn should_hide(stats: &CapabilityStats, thresholds: &Thresholds) -> bool {
    if stats.total_executions_7d < MIN_EVENTS_FOR_SIGNALS {
        return false;
    }
    stats.success_rate_7d < thresholds.min_success_rate_7d
}

/// Whether the capability should be throttled at the gateway.
///
/// Fires only with enough data (≥ 5 executions) and a p95 latency above
/// the threshold.
pub fn should_throttle(stats: &CapabilityStats, thresholds: &Thresholds) -> bool {
    if stats.total_executions_7d < MIN_EVENTS_FOR_SIGNALS {
        return false;
    }
    stats.p95_latency_ms > thresholds.max_p95_latency_ms
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
