use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mimalloc::MiMalloc;
use tracing::{error, info};

use rust_loadtest::{
    client, config::Config, load_generator::LoadGenerator, repository::{
        InMemoryMetricsRepository, InMemoryTestPlanRepository, InMemoryTestRunRepository,
    },
    service::Service, supervisor::Supervisor, Collector, NullCollector, TestPlanDraft,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    rust_loadtest::init_tracing(&config.log_level, config.log_format == rust_loadtest::config::LogFormat::Json);

    let client_config = config.to_client_config();
    let built = client::build_client(&client_config)?;

    let collector: Arc<dyn Collector> = Arc::new(NullCollector);
    let load_generator = Arc::new(LoadGenerator::new(built.client, collector));

    let plans = Arc::new(InMemoryTestPlanRepository::default());
    let runs = Arc::new(InMemoryTestRunRepository::default());
    let metrics_repo = Arc::new(InMemoryMetricsRepository::default());

    let service = Service::new(
        load_generator.clone(),
        plans.clone(),
        runs.clone(),
        metrics_repo,
        config.default_timeout_ms,
        config.max_workers,
    );

    let supervisor = Supervisor::new(load_generator, plans, runs);
    let supervisor_cancel = tokio_util::sync::CancellationToken::new();
    let supervisor_task = {
        let cancel = supervisor_cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    };

    let target_url = std::env::var("TARGET_URL").unwrap_or_else(|_| "https://example.com".into());
    let draft = TestPlanDraft {
        name: "ad-hoc smoke test".into(),
        target_url,
        method: Some("GET".into()),
        headers: HashMap::new(),
        body: None,
        users: 10,
        ramp_up_seconds: 2,
        duration_seconds: 10,
        timeout_ms: None,
        target_rps: 20.0,
        rate_pattern: None,
        rate_steps: vec![],
        sla: None,
    };

    let plan = service.create_test_plan(draft).await?;
    info!(plan_id = plan.id, target = plan.target_url, "plan created");

    let run = service.start_test(&plan.id, unix_now()).await?;
    info!(run_id = run.id, "run started");

    tokio::time::sleep(std::time::Duration::from_secs(plan.duration_seconds + 1)).await;

    match service.get_metrics(&run.id).await {
        Ok(snapshot) => info!(
            total = snapshot.total,
            success = snapshot.success,
            failed = snapshot.failed,
            p50 = snapshot.p50,
            p99 = snapshot.p99,
            rps = snapshot.requests_per_second,
            "run finished"
        ),
        Err(e) => error!(error = %e, "failed to read final metrics"),
    }

    supervisor_cancel.cancel();
    let _ = supervisor_task.await;

    Ok(())
}
