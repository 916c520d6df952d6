//! Public façade: the surface a caller embeds against — create a plan,
//! start/stop a run, read back metrics.

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::CoreError;
use crate::load_generator::LoadGenerator;
use crate::metrics::MetricsSnapshot;
use crate::plan::{TestPlan, TestPlanDraft};
use crate::repository::{MetricsRepository, TestPlanRepository, TestRunRepository};
use crate::run::TestRun;

pub struct Service {
    load_generator: Arc<LoadGenerator>,
    plans: Arc<dyn TestPlanRepository>,
    runs: Arc<dyn TestRunRepository>,
    metrics_repo: Arc<dyn MetricsRepository>,
    default_timeout_ms: u64,
    max_users: usize,
}

impl Service {
    pub fn new(
        load_generator: Arc<LoadGenerator>,
        plans: Arc<dyn TestPlanRepository>,
        runs: Arc<dyn TestRunRepository>,
        metrics_repo: Arc<dyn MetricsRepository>,
        default_timeout_ms: u64,
        max_users: usize,
    ) -> Self {
        Self {
            load_generator,
            plans,
            runs,
            metrics_repo,
            default_timeout_ms,
            max_users,
        }
    }

    pub async fn create_test_plan(&self, draft: TestPlanDraft) -> Result<TestPlan, CoreError> {
        let id = Uuid::new_v4().to_string();
        let plan = TestPlan::from_draft(id, draft, self.default_timeout_ms, self.max_users)?;
        self.plans.insert(plan.clone()).await;
        Ok(plan)
    }

    pub async fn get_test_plan(&self, id: &str) -> Result<TestPlan, CoreError> {
        self.plans.get(id).await
    }

    pub async fn list_test_plans(&self) -> Vec<TestPlan> {
        self.plans.list().await
    }

    pub async fn start_test(&self, plan_id: &str, now: f64) -> Result<TestRun, CoreError> {
        let plan = self.plans.get(plan_id).await?;
        let run_id = Uuid::new_v4().to_string();
        let run = TestRun::new(run_id.clone(), plan_id.to_string(), now);

        self.load_generator.start_test(run_id, Arc::new(plan)).await?;
        self.runs.insert(run.clone()).await;
        Ok(run)
    }

    pub async fn stop_test(&self, run_id: &str) -> Result<(), CoreError> {
        self.load_generator.stop_test(run_id).await
    }

    pub async fn get_test_run(&self, run_id: &str) -> Result<TestRun, CoreError> {
        self.runs.get(run_id).await
    }

    pub async fn list_test_runs(&self) -> Vec<TestRun> {
        self.runs.list().await
    }

    /// Live metrics if the run is still active, else the last persisted
    /// snapshot recorded when it finished.
    pub async fn get_metrics(&self, run_id: &str) -> Result<MetricsSnapshot, CoreError> {
        if let Ok(snapshot) = self.load_generator.get_metrics(run_id).await {
            return Ok(snapshot);
        }
        self.metrics_repo.get(run_id).await
    }

    /// Persist the final snapshot for a run that has just completed, so it
    /// remains retrievable after the generator reaps the execution.
    pub async fn archive_metrics(&self, run_id: &str, snapshot: MetricsSnapshot) {
        self.metrics_repo.put(run_id, snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::NullCollector;
    use crate::plan::RatePatternKind;
    use crate::repository::{InMemoryMetricsRepository, InMemoryTestPlanRepository, InMemoryTestRunRepository};
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service() -> Service {
        let lg = Arc::new(LoadGenerator::new(reqwest::Client::new(), Arc::new(NullCollector)));
        Service::new(
            lg,
            Arc::new(InMemoryTestPlanRepository::default()),
            Arc::new(InMemoryTestRunRepository::default()),
            Arc::new(InMemoryMetricsRepository::default()),
            5_000,
            crate::plan::MAX_USERS,
        )
    }

    fn valid_draft(url: String) -> TestPlanDraft {
        TestPlanDraft {
            name: "smoke".into(),
            target_url: url,
            method: Some("GET".into()),
            users: 2,
            duration_seconds: 1,
            target_rps: 10.0,
            rate_pattern: Some(RatePatternKind::Fixed),
            headers: HashMap::new(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_start_then_read_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let svc = service();
        let plan = svc.create_test_plan(valid_draft(server.uri())).await.unwrap();
        let run = svc.start_test(&plan.id, 0.0).await.unwrap();

        let snap = svc.get_metrics(&run.id).await.unwrap();
        assert_eq!(snap.run_id, run.id);

        svc.stop_test(&run.id).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_touching_the_generator() {
        let svc = service();
        let mut draft = valid_draft("http://localhost/".into());
        draft.name.clear();
        assert!(svc.create_test_plan(draft).await.is_err());
    }

    #[tokio::test]
    async fn starting_an_unknown_plan_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.start_test("missing", 0.0).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
