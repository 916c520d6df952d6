//! HTTP Worker: consumes dispatch tokens, performs one request per
//! token, and records the outcome on the shared Metrics Accumulator.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collector::Collector;
use crate::errors::ErrorCategory;
use crate::metrics::Metrics;
use crate::plan::TestPlan;
use crate::reservoir::LatencyReservoir;
use crate::template;

pub struct WorkerConfig {
    pub worker_id: usize,
    pub plan: Arc<TestPlan>,
    pub client: reqwest::Client,
    pub metrics: Metrics,
    pub reservoir: Arc<LatencyReservoir>,
    pub collector: Arc<dyn Collector>,
}

/// Runs until the dispatch-token channel closes or `cancel` fires.
///
/// One token consumed → one HTTP request issued. There is no internal
/// pacing here — the Rate Shaper is solely responsible for *when*
/// tokens arrive; the worker's only job is to drain them as fast as it can.
pub async fn run_worker(mut tokens: mpsc::Receiver<()>, cancel: CancellationToken, config: WorkerConfig) {
    debug!(worker_id = config.worker_id, "worker starting");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            token = tokens.recv() => {
                if token.is_none() {
                    break;
                }
            }
        }

        let start = Instant::now();
        let outcome = perform_request(&config.client, &config.plan).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(status) => {
                let success = (200..400).contains(&status);
                let error_tag = if success {
                    None
                } else {
                    ErrorCategory::from_status_code(status).map(|c| c.label().to_string())
                };
                config.metrics.record_request(
                    success,
                    latency_ms,
                    status,
                    error_tag.as_deref(),
                    config.collector.as_ref(),
                    config.plan.method.as_str(),
                );
                config.reservoir.push(latency_ms);
            }
            Err(category) => {
                warn!(
                    worker_id = config.worker_id,
                    category = category.label(),
                    "request failed"
                );
                config.metrics.record_request(
                    false,
                    latency_ms,
                    0,
                    Some(category.label()),
                    config.collector.as_ref(),
                    config.plan.method.as_str(),
                );
                config.reservoir.push(latency_ms);
            }
        }
    }

    debug!(worker_id = config.worker_id, "worker stopping");
}

/// Perform one HTTP call for `plan`, applying template substitution to the
/// body and header values, draining the response body in chunks, and
/// returning either the status code or a categorized transport error.
async fn perform_request(client: &reqwest::Client, plan: &TestPlan) -> Result<u16, ErrorCategory> {
    let url = template::substitute(&plan.target_url);
    let mut builder = client.request(method_for(plan.method), url);

    for (name, value) in &plan.headers {
        builder = builder.header(name, template::substitute(value));
    }

    if let Some(body) = &plan.body {
        builder = builder.body(template::substitute(body));
    }

    if plan.timeout_ms > 0 {
        builder = builder.timeout(StdDuration::from_millis(plan.timeout_ms));
    }

    match builder.send().await {
        Ok(mut response) => {
            let status = response.status().as_u16();
            // Drain and discard the body in chunks rather than buffering it
            // whole, so a slow or unbounded response body can't accumulate
            // memory across a high-RPS run.
            while let Ok(Some(_chunk)) = response.chunk().await {}
            Ok(status)
        }
        Err(e) => Err(ErrorCategory::from_reqwest_error(&e)),
    }
}

fn method_for(method: crate::plan::HttpMethod) -> reqwest::Method {
    use crate::plan::HttpMethod as M;
    match method {
        M::Get => reqwest::Method::GET,
        M::Post => reqwest::Method::POST,
        M::Put => reqwest::Method::PUT,
        M::Patch => reqwest::Method::PATCH,
        M::Delete => reqwest::Method::DELETE,
        M::Head => reqwest::Method::HEAD,
        M::Options => reqwest::Method::OPTIONS,
    }
}
