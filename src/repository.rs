//! Persistence seams for test plans, runs, and metrics snapshots.
//!
//! The crate ships only in-memory implementations; a caller embedding this
//! as a library is free to implement the traits against whatever store they
//! already run (Postgres, Redis,...).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::metrics::MetricsSnapshot;
use crate::plan::TestPlan;
use crate::run::TestRun;

#[async_trait]
pub trait TestPlanRepository: Send + Sync {
    async fn insert(&self, plan: TestPlan);
    async fn get(&self, id: &str) -> Result<TestPlan, CoreError>;
    async fn list(&self) -> Vec<TestPlan>;
}

#[async_trait]
pub trait TestRunRepository: Send + Sync {
    async fn insert(&self, run: TestRun);
    async fn get(&self, id: &str) -> Result<TestRun, CoreError>;
    async fn update(&self, run: TestRun);
    async fn list(&self) -> Vec<TestRun>;
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn put(&self, run_id: &str, snapshot: MetricsSnapshot);
    async fn get(&self, run_id: &str) -> Result<MetricsSnapshot, CoreError>;
}

#[derive(Default)]
pub struct InMemoryTestPlanRepository {
    plans: Mutex<HashMap<String, TestPlan>>,
}

#[async_trait]
impl TestPlanRepository for InMemoryTestPlanRepository {
    async fn insert(&self, plan: TestPlan) {
        self.plans.lock().unwrap().insert(plan.id.clone(), plan);
    }

    async fn get(&self, id: &str) -> Result<TestPlan, CoreError> {
        self.plans
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("test plan", id))
    }

    async fn list(&self) -> Vec<TestPlan> {
        self.plans.lock().unwrap().values().cloned().collect()
    }
}

#[derive(Default)]
pub struct InMemoryTestRunRepository {
    runs: Mutex<HashMap<String, TestRun>>,
}

#[async_trait]
impl TestRunRepository for InMemoryTestRunRepository {
    async fn insert(&self, run: TestRun) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }

    async fn get(&self, id: &str) -> Result<TestRun, CoreError> {
        self.runs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("test run", id))
    }

    async fn update(&self, run: TestRun) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }

    async fn list(&self) -> Vec<TestRun> {
        self.runs.lock().unwrap().values().cloned().collect()
    }
}

#[derive(Default)]
pub struct InMemoryMetricsRepository {
    snapshots: Mutex<HashMap<String, MetricsSnapshot>>,
}

#[async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn put(&self, run_id: &str, snapshot: MetricsSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(run_id.to_string(), snapshot);
    }

    async fn get(&self, run_id: &str) -> Result<MetricsSnapshot, CoreError> {
        self.snapshots
            .lock()
            .unwrap()
            .get(run_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("metrics", run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{HttpMethod, RatePatternKind};
    use std::collections::HashMap as Map;

    fn sample_plan(id: &str) -> TestPlan {
        TestPlan {
            id: id.into(),
            name: "t".into(),
            target_url: "http://localhost/".into(),
            method: HttpMethod::Get,
            headers: Map::new(),
            body: None,
            users: 1,
            ramp_up_seconds: 0,
            duration_seconds: 1,
            timeout_ms: 1000,
            target_rps: 1.0,
            rate_pattern: RatePatternKind::Fixed,
            rate_steps: vec![],
            sla: None,
        }
    }

    #[tokio::test]
    async fn plan_repository_round_trips() {
        let repo = InMemoryTestPlanRepository::default();
        repo.insert(sample_plan("p1")).await;
        let got = repo.get("p1").await.unwrap();
        assert_eq!(got.id, "p1");
        assert_eq!(repo.list().await.len(), 1);
    }

    #[tokio::test]
    async fn plan_repository_missing_id_returns_not_found() {
        let repo = InMemoryTestPlanRepository::default();
        assert!(matches!(repo.get("missing").await, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn run_repository_update_overwrites_existing() {
        let repo = InMemoryTestRunRepository::default();
        let mut run = TestRun::new("r1", "p1", 0.0);
        repo.insert(run.clone()).await;
        run.transition_to(crate::run::RunStatus::Completed, crate::run::StopReason::Completed, 5.0);
        repo.update(run).await;

        let got = repo.get("r1").await.unwrap();
        assert_eq!(got.status, crate::run::RunStatus::Completed);
    }

    #[tokio::test]
    async fn metrics_repository_round_trips() {
        let repo = InMemoryMetricsRepository::default();
        let snap = crate::metrics::Metrics::new("r1").snapshot();
        repo.put("r1", snap.clone()).await;
        let got = repo.get("r1").await.unwrap();
        assert_eq!(got.run_id, "r1");
    }
}
