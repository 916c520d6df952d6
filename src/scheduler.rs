//! Orchestrates one run's worker pool, rate shaper, and periodic reporting,
//! then performs final percentile aggregation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collector::Collector;
use crate::metrics::Metrics;
use crate::plan::{RatePatternKind, TestPlan};
use crate::rate_shaper::{RatePattern, RateShaper};
use crate::reservoir::LatencyReservoir;
use crate::worker::{run_worker, WorkerConfig};

/// Cadence at which `Metrics::update_live` recomputes the rolling rate.
pub const REPORTER_INTERVAL: Duration = Duration::from_secs(5);

/// Dispatch-token channel capacity: `users * 10`, bounding how far
/// the shaper can run ahead of a saturated worker pool before it starts
/// dropping tokens.
fn channel_capacity(users: usize) -> usize {
    users.saturating_mul(10).max(1)
}

fn pattern_for(kind: RatePatternKind) -> RatePattern {
    match kind {
        RatePatternKind::Fixed => RatePattern::Fixed,
        RatePatternKind::Step => RatePattern::Step,
        RatePatternKind::Ramp => RatePattern::Ramp,
        RatePatternKind::Spike => RatePattern::Spike,
    }
}

/// Final aggregated figures computed once every worker has stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalStats {
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
    pub requests_per_second: f64,
}

pub struct Scheduler {
    plan: Arc<TestPlan>,
    metrics: Metrics,
    client: reqwest::Client,
    collector: Arc<dyn Collector>,
    cancel: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    shaper_handle: Option<JoinHandle<()>>,
    reporter_handle: Option<JoinHandle<()>>,
    reservoirs: Vec<Arc<LatencyReservoir>>,
}

impl Scheduler {
    pub fn new(
        plan: Arc<TestPlan>,
        metrics: Metrics,
        client: reqwest::Client,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            plan,
            metrics,
            client,
            collector,
            cancel: CancellationToken::new(),
            worker_handles: Vec::new(),
            shaper_handle: None,
            reporter_handle: None,
            reservoirs: Vec::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the worker pool (staggered across `ramp_up_seconds`), the rate
    /// shaper, and the periodic reporter. Returns once every task has been
    /// spawned; callers await completion via [`Scheduler::wait`].
    pub fn start(&mut self) {
        let capacity = channel_capacity(self.plan.users);
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<()>(capacity);
        let shared_rx = Arc::new(AsyncMutex::new(dispatch_rx));

        let stagger = if self.plan.users > 0 {
            Duration::from_secs_f64(self.plan.ramp_up_seconds as f64) / self.plan.users as u32
        } else {
            Duration::ZERO
        };

        // With no ramp-up every worker is live from the first tick; with a
        // ramp-up each worker bumps the gauge itself once its own stagger
        // delay elapses, so `active_workers` climbs in step with reality
        // instead of jumping straight to `users`.
        if stagger.is_zero() {
            self.metrics.set_active_workers(self.plan.users);
            self.collector.set_active_workers(self.metrics.run_id(), self.plan.users);
        }

        for worker_id in 0..self.plan.users {
            let reservoir = Arc::new(LatencyReservoir::default());
            self.reservoirs.push(reservoir.clone());

            let config = WorkerConfig {
                worker_id,
                plan: self.plan.clone(),
                client: self.client.clone(),
                metrics: self.metrics.clone(),
                reservoir,
                collector: self.collector.clone(),
            };
            let cancel = self.cancel.clone();
            let rx = shared_rx.clone();
            let delay = stagger * worker_id as u32;
            let metrics = self.metrics.clone();
            let collector = self.collector.clone();

            let stagger_active = !stagger.is_zero();

            let handle = tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if stagger_active {
                    metrics.increment_active_workers();
                    collector.set_active_workers(metrics.run_id(), metrics.active_workers());
                }
                run_shared_worker(rx, cancel, config).await;
            });
            self.worker_handles.push(handle);
        }

        let shaper = RateShaper::new(
            pattern_for(self.plan.rate_pattern),
            self.plan.target_rps,
            self.plan.rate_steps.clone(),
        );
        let run_duration = Duration::from_secs(self.plan.duration_seconds);
        let shaper_cancel = self.cancel.clone();
        self.shaper_handle = Some(tokio::spawn(async move {
            shaper.run(dispatch_tx, shaper_cancel, run_duration).await;
        }));

        let metrics = self.metrics.clone();
        let reporter_cancel = self.cancel.clone();
        self.reporter_handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPORTER_INTERVAL);
            loop {
                tokio::select! {
                    _ = reporter_cancel.cancelled() => break,
                    _ = interval.tick() => metrics.update_live(),
                }
            }
        }));

        // The run terminates itself once `run_duration` elapses, even
        // without external cancellation; arm a matching deadline so the
        // reporter and workers stop instead of idling forever.
        let deadline_cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(run_duration).await;
            deadline_cancel.cancel();
        });

        info!(run_id = self.metrics.run_id(), users = self.plan.users, "scheduler started");
    }

    /// Wait for every spawned task to finish, then compute final
    /// percentiles and RPS from the concatenation of every worker's
    /// reservoir.
    pub async fn wait(mut self) -> FinalStats {
        if let Some(h) = self.shaper_handle.take() {
            let _ = h.await;
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        if let Some(h) = self.reporter_handle.take() {
            let _ = h.await;
        }
        self.metrics.set_active_workers(0);
        self.collector.set_active_workers(self.metrics.run_id(), 0);

        let stats = self.compute_final_stats();
        self.metrics
            .set_final_percentiles(stats.p50, stats.p75, stats.p95, stats.p99, stats.avg);
        self.metrics.set_requests_per_second(stats.requests_per_second);
        stats
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn compute_final_stats(&self) -> FinalStats {
        let mut all: Vec<f64> = self.reservoirs.iter().flat_map(|r| r.snapshot()).collect();
        if all.is_empty() {
            return FinalStats::default();
        }
        all.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let percentile = |p: f64| -> f64 {
            let idx = ((p / 100.0) * (all.len() as f64 - 1.0)).round() as usize;
            all[idx.min(all.len() - 1)]
        };

        let sum: f64 = all.iter().sum();
        let avg = sum / all.len() as f64;
        let snap = self.metrics.snapshot();
        let requests_per_second = if snap.total_duration_ms > 0.0 {
            snap.total as f64 / (snap.total_duration_ms / 1000.0)
        } else {
            0.0
        };

        FinalStats {
            p50: percentile(50.0),
            p75: percentile(75.0),
            p95: percentile(95.0),
            p99: percentile(99.0),
            avg,
            requests_per_second,
        }
    }
}

/// A worker body bound to a receiver shared (via an async mutex) across the
/// whole pool, rather than each worker owning its own channel.
async fn run_shared_worker(
    rx: Arc<AsyncMutex<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
    config: WorkerConfig,
) {
    let (proxy_tx, proxy_rx) = mpsc::channel::<()>(1);
    let forward_cancel = cancel.clone();
    let forward = tokio::spawn(async move {
        loop {
            let token = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = forward_cancel.cancelled() => None,
                    t = guard.recv() => t,
                }
            };
            match token {
                Some(()) => {
                    if proxy_tx.send(()).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    });

    run_worker(proxy_rx, cancel, config).await;
    forward.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::NullCollector;
    use crate::plan::TestPlanDraft;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn draft(url: String) -> TestPlanDraft {
        TestPlanDraft {
            name: "smoke".into(),
            target_url: url,
            method: Some("GET".into()),
            users: 3,
            ramp_up_seconds: 0,
            duration_seconds: 1,
            target_rps: 50.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_run_produces_percentiles_and_matching_totals() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let plan = Arc::new(
            TestPlan::from_draft("run-1", draft(server.uri()), 5_000, crate::plan::MAX_USERS).unwrap(),
        );
        let metrics = Metrics::new("run-1");
        let mut scheduler = Scheduler::new(
            plan,
            metrics.clone(),
            reqwest::Client::new(),
            Arc::new(NullCollector),
        );

        scheduler.start();
        let stats = scheduler.wait().await;

        let snap = metrics.snapshot();
        assert_eq!(snap.success + snap.failed, snap.total);
        if snap.success > 0 {
            assert!(stats.p50 >= 0.0);
            assert!(stats.p99 >= stats.p50);
        }
    }

    #[test]
    fn channel_capacity_is_ten_times_users() {
        assert_eq!(channel_capacity(5), 50);
        assert_eq!(channel_capacity(0), 1);
    }
}
