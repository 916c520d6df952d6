//! Process-wide registry of active runs: owns the shared HTTP
//! transport and tracks one `TestExecution` per in-flight run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::collector::Collector;
use crate::errors::CoreError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::plan::TestPlan;
use crate::scheduler::{FinalStats, Scheduler};
use tokio_util::sync::CancellationToken;

struct TestExecution {
    metrics: Metrics,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<FinalStats>,
}

/// Owns the transport that every worker across every run shares,
/// and the map of currently-running tests. Held behind a short critical
/// section — the mutex is never held across an `.await` that isn't itself
/// a map lookup/insert.
pub struct LoadGenerator {
    transport: reqwest::Client,
    collector: Arc<dyn Collector>,
    active: Mutex<HashMap<String, TestExecution>>,
}

impl LoadGenerator {
    pub fn new(transport: reqwest::Client, collector: Arc<dyn Collector>) -> Self {
        Self {
            transport,
            collector,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start_test(&self, run_id: String, plan: Arc<TestPlan>) -> Result<Metrics, CoreError> {
        let mut active = self.active.lock().await;
        if active.contains_key(&run_id) {
            return Err(CoreError::already_running(run_id));
        }

        let metrics = Metrics::new(run_id.clone());
        let mut scheduler = Scheduler::new(plan, metrics.clone(), self.transport.clone(), self.collector.clone());
        let cancel = scheduler.cancellation_token();

        let join = tokio::spawn(async move {
            scheduler.start();
            scheduler.wait().await
        });

        active.insert(
            run_id.clone(),
            TestExecution {
                metrics: metrics.clone(),
                cancel,
                join,
            },
        );
        self.collector.set_active_tests(active.len());
        info!(run_id, "test started");

        Ok(metrics)
    }

    pub async fn stop_test(&self, run_id: &str) -> Result<(), CoreError> {
        let active = self.active.lock().await;
        let execution = active
            .get(run_id)
            .ok_or_else(|| CoreError::not_found("test run", run_id))?;
        execution.cancel.cancel();
        Ok(())
    }

    pub async fn is_running(&self, run_id: &str) -> bool {
        self.active.lock().await.contains_key(run_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn get_metrics(&self, run_id: &str) -> Result<MetricsSnapshot, CoreError> {
        let active = self.active.lock().await;
        let execution = active
            .get(run_id)
            .ok_or_else(|| CoreError::not_found("test run", run_id))?;
        Ok(execution.metrics.snapshot())
    }

    /// Drop a run from the active set once its scheduler has finished.
    /// Callers poll completion (e.g. the Run Supervisor) and reap here.
    pub async fn reap_if_finished(&self, run_id: &str) -> Option<FinalStats> {
        let mut active = self.active.lock().await;
        let execution = active.get_mut(run_id)?;
        if !execution.join.is_finished() {
            return None;
        }
        let execution = active.remove(run_id)?;
        self.collector.set_active_tests(active.len());
        execution.join.await.ok()
    }

    /// Cancel every active run and wait up to `timeout` for them to settle.
    pub async fn shutdown(&self, timeout: Duration) {
        let run_ids: Vec<String> = {
            let active = self.active.lock().await;
            active.keys().cloned().collect()
        };
        for id in &run_ids {
            let _ = self.stop_test(id).await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_count().await == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            for id in &run_ids {
                self.reap_if_finished(id).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
