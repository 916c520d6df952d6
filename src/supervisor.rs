//! Run Supervisor: polls each active run's metrics, terminating a
//! run the moment it breaches its plan's SLA.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::load_generator::LoadGenerator;
use crate::metrics::MetricsSnapshot;
use crate::plan::{Sla, TestPlan};
use crate::repository::{TestPlanRepository, TestRunRepository};
use crate::run::{RunStatus, StopReason};

/// Poll cadence for SLA evaluation.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Returns the first violated SLA clause, if any, as a human-readable
/// reason string.
pub fn evaluate_sla(sla: &Sla, snapshot: &MetricsSnapshot) -> Option<String> {
    if sla.max_p95_ms > 0.0 && snapshot.p95 > sla.max_p95_ms {
        return Some(format!("p95 {:.1}ms exceeds max {:.1}ms", snapshot.p95, sla.max_p95_ms));
    }
    if sla.max_p99_ms > 0.0 && snapshot.p99 > sla.max_p99_ms {
        return Some(format!("p99 {:.1}ms exceeds max {:.1}ms", snapshot.p99, sla.max_p99_ms));
    }
    if sla.max_error_rate_pct > 0.0 && snapshot.total > 0 {
        let error_rate = snapshot.failed as f64 / snapshot.total as f64 * 100.0;
        if error_rate > sla.max_error_rate_pct {
            return Some(format!(
                "error rate {:.1}% exceeds max {:.1}%",
                error_rate, sla.max_error_rate_pct
            ));
        }
    }
    if sla.min_rps > 0.0 && snapshot.current_rps > 0.0 && snapshot.current_rps < sla.min_rps {
        return Some(format!(
            "current rps {:.1} below min {:.1}",
            snapshot.current_rps, sla.min_rps
        ));
    }
    None
}

pub struct Supervisor {
    load_generator: Arc<LoadGenerator>,
    plans: Arc<dyn TestPlanRepository>,
    runs: Arc<dyn TestRunRepository>,
}

impl Supervisor {
    pub fn new(
        load_generator: Arc<LoadGenerator>,
        plans: Arc<dyn TestPlanRepository>,
        runs: Arc<dyn TestRunRepository>,
    ) -> Self {
        Self {
            load_generator,
            plans,
            runs,
        }
    }

    /// Poll once, evaluating every currently-tracked run's SLA and
    /// reconciling terminal runs whose scheduler has already finished.
    pub async fn tick(&self, now: f64) {
        for mut run in self.runs.list().await {
            if run.status.is_terminal() {
                continue;
            }

            if let Some(stats) = self.load_generator.reap_if_finished(&run.id).await {
                let _ = stats;
                run.transition_to(RunStatus::Completed, StopReason::Completed, now);
                self.runs.update(run).await;
                continue;
            }

            let Ok(plan) = self.plans.get(&run.plan_id).await else {
                continue;
            };
            let Some(sla) = sla_of(&plan) else { continue };

            let Ok(snapshot) = self.load_generator.get_metrics(&run.id).await else {
                continue;
            };

            if let Some(reason) = evaluate_sla(&sla, &snapshot) {
                warn!(run_id = run.id, reason = %reason, "SLA violated, stopping run");
                let _ = self.load_generator.stop_test(&run.id).await;
                run.transition_to(RunStatus::Failed, StopReason::Failed, now);
                self.runs.update(run).await;
            }
        }
    }

    /// Run `tick` on `POLL_INTERVAL` until `cancel` fires.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(unix_now()).await,
            }
        }
    }
}

fn sla_of(plan: &TestPlan) -> Option<Sla> {
    plan.sla
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
