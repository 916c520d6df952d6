//! Thread-safe metrics accumulator, one instance per run.
//!
//! Counters, the status-code and error distributions, and the live-rate gauge
//! all live behind a single mutex. `snapshot()` returns an owned, internally
//! consistent copy — callers never see a torn read and never hold the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::collector::Collector;

/// Distinct error tags kept before overflow coalesces into `"other"`.
const MAX_ERROR_TAGS: usize = 64;

/// Sentinel for "no latency samples yet".
pub const NO_SAMPLES_SENTINEL: f64 = -1.0;

struct Inner {
    total: u64,
    success: u64,
    failed: u64,
    min_ms: f64,
    max_ms: f64,
    sum_ms: f64,
    status_codes: HashMap<u16, u64>,
    errors: HashMap<String, u64>,
    active_workers: usize,
    start: Instant,
    last_live_at: Instant,
    last_live_total: u64,
    current_rps: f64,
    requests_per_second: f64,
    p50: f64,
    p75: f64,
    p95: f64,
    p99: f64,
}

impl Inner {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            total: 0,
            success: 0,
            failed: 0,
            min_ms: NO_SAMPLES_SENTINEL,
            max_ms: 0.0,
            sum_ms: 0.0,
            status_codes: HashMap::new(),
            errors: HashMap::new(),
            active_workers: 0,
            start: now,
            last_live_at: now,
            last_live_total: 0,
            current_rps: 0.0,
            requests_per_second: 0.0,
            p50: 0.0,
            p75: 0.0,
            p95: 0.0,
            p99: 0.0,
        }
    }
}

/// A deep-copied, point-in-time view of a run's metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub run_id: String,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub total_duration_ms: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub requests_per_second: f64,
    pub current_rps: f64,
    pub active_workers: usize,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<String, u64>,
    pub last_updated: f64,
}

/// Shared, cloneable handle to one run's metrics.
///
/// Cheap to clone (an `Arc` bump) — every Worker and the Supervisor hold a
/// clone of the same instance.
#[derive(Clone)]
pub struct Metrics {
    run_id: String,
    inner: Arc<Mutex<Inner>>,
}

impl Metrics {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record the outcome of one completed request.
    ///
    /// `status_code` of 0 means no response was received (transport error);
    /// `error` is a short, stable tag (see [`crate::errors::ErrorCategory`]).
    pub fn record_request(
        &self,
        success: bool,
        latency_ms: f64,
        status_code: u16,
        error: Option<&str>,
        collector: &dyn Collector,
        method: &str,
    ) {
        let mut inner = self.inner.lock().unwrap();

        inner.total += 1;
        if success {
            inner.success += 1;
        } else {
            inner.failed += 1;
        }

        if inner.min_ms == NO_SAMPLES_SENTINEL || latency_ms < inner.min_ms {
            inner.min_ms = latency_ms;
        }
        if latency_ms > inner.max_ms {
            inner.max_ms = latency_ms;
        }
        inner.sum_ms += latency_ms;

        if status_code > 0 {
            *inner.status_codes.entry(status_code).or_insert(0) += 1;
        }

        if !success {
            if let Some(tag) = error {
                if !tag.is_empty() {
                    let key = if inner.errors.len() >= MAX_ERROR_TAGS && !inner.errors.contains_key(tag) {
                        "other"
                    } else {
                        tag
                    };
                    *inner.errors.entry(key.to_string()).or_insert(0) += 1;
                }
            }
        }

        let status_tag = if status_code > 0 {
            status_code.to_string()
        } else {
            error.unwrap_or("error").to_string()
        };
        collector.record_request(&self.run_id, method, &status_tag, latency_ms / 1000.0, !success);
    }

    pub fn set_active_workers(&self, n: usize) {
        self.inner.lock().unwrap().active_workers = n;
    }

    /// Bump the active worker count by one as a staggered worker comes
    /// online during ramp-up.
    pub fn increment_active_workers(&self) {
        self.inner.lock().unwrap().active_workers += 1;
    }

    pub fn active_workers(&self) -> usize {
        self.inner.lock().unwrap().active_workers
    }

    /// Recompute the live-rate gauge and elapsed-duration field.
    ///
    /// Intended to be called periodically.
    pub fn update_live(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_live_at).as_secs_f64();
        if elapsed > 0.0 {
            let delta = inner.total.saturating_sub(inner.last_live_total);
            inner.current_rps = delta as f64 / elapsed;
        }
        inner.last_live_at = now;
        inner.last_live_total = inner.total;
    }

    /// Set the final percentile/average figures computed by the Scheduler
    /// at the end of a run.
    pub fn set_final_percentiles(&self, p50: f64, p75: f64, p95: f64, p99: f64, avg: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.p50 = p50;
        inner.p75 = p75;
        inner.p95 = p95;
        inner.p99 = p99;
        inner.sum_ms = avg * inner.total as f64;
    }

    pub fn set_requests_per_second(&self, rps: f64) {
        self.inner.lock().unwrap().requests_per_second = rps;
    }

    /// Deep-copied, internally consistent view of every field.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap();
        let avg = if inner.total > 0 {
            inner.sum_ms / inner.total as f64
        } else {
            0.0
        };
        MetricsSnapshot {
            run_id: self.run_id.clone(),
            total: inner.total,
            success: inner.success,
            failed: inner.failed,
            total_duration_ms: inner.start.elapsed().as_secs_f64() * 1000.0,
            min: inner.min_ms,
            max: inner.max_ms,
            avg,
            p50: inner.p50,
            p75: inner.p75,
            p95: inner.p95,
            p99: inner.p99,
            requests_per_second: inner.requests_per_second,
            current_rps: inner.current_rps,
            active_workers: inner.active_workers,
            status_codes: inner.status_codes.clone(),
            errors: inner.errors.clone(),
            last_updated: unix_now(),
        }
    }
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::NullCollector;

    #[test]
    fn fresh_metrics_have_sentinel_min_and_zero_counts() {
        let m = Metrics::new("run-1");
        let snap = m.snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.min, NO_SAMPLES_SENTINEL);
    }

    #[test]
    fn record_request_updates_counters_and_min_max() {
        let m = Metrics::new("run-1");
        let c = NullCollector;
        m.record_request(true, 10.0, 200, None, &c, "GET");
        m.record_request(true, 30.0, 200, None, &c, "GET");
        m.record_request(false, 5.0, 0, Some("timeout_error"), &c, "GET");

        let snap = m.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.success, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.min, 5.0);
        assert_eq!(snap.max, 30.0);
        assert_eq!(snap.status_codes.get(&200), Some(&2));
        assert_eq!(snap.errors.get("timeout_error"), Some(&1));
    }

    #[test]
    fn snapshot_success_plus_failed_equals_total() {
        let m = Metrics::new("run-1");
        let c = NullCollector;
        for i in 0..10 {
            m.record_request(i % 3 != 0, 1.0, 200, Some("client_error"), &c, "GET");
        }
        let snap = m.snapshot();
        assert_eq!(snap.success + snap.failed, snap.total);
    }

    #[test]
    fn error_tags_coalesce_to_other_above_cap() {
        let m = Metrics::new("run-1");
        let c = NullCollector;
        for i in 0..(MAX_ERROR_TAGS + 5) {
            let tag = format!("tag-{i}");
            m.record_request(false, 1.0, 0, Some(&tag), &c, "GET");
        }
        let snap = m.snapshot();
        assert!(snap.errors.len() <= MAX_ERROR_TAGS);
        assert!(snap.errors.contains_key("other"));
    }

    #[test]
    fn repeated_snapshot_with_no_intervening_records_is_identical() {
        let m = Metrics::new("run-1");
        let c = NullCollector;
        m.record_request(true, 12.0, 200, None, &c, "GET");
        let a = m.snapshot();
        let b = m.snapshot();
        assert_eq!(a.total, b.total);
        assert_eq!(a.success, b.success);
        assert_eq!(a.status_codes, b.status_codes);
    }

    #[test]
    fn update_live_computes_a_nonnegative_rate() {
        let m = Metrics::new("run-1");
        let c = NullCollector;
        m.record_request(true, 1.0, 200, None, &c, "GET");
        std::thread::sleep(std::time::Duration::from_millis(10));
        m.update_live();
        let snap = m.snapshot();
        assert!(snap.current_rps >= 0.0);
    }

    #[test]
    fn active_workers_round_trips() {
        let m = Metrics::new("run-1");
        m.set_active_workers(5);
        assert_eq!(m.active_workers(), 5);
        assert_eq!(m.snapshot().active_workers, 5);
    }
}
