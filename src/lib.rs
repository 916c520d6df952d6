//! HTTP load-testing core: define a `TestPlan`, hand it to a `Service`, read
//! back live and final `MetricsSnapshot`s while a run executes.

pub mod client;
pub mod collector;
pub mod config;
pub mod connection_pool;
pub mod errors;
pub mod load_generator;
pub mod metrics;
pub mod plan;
pub mod rate_shaper;
pub mod repository;
pub mod reservoir;
pub mod run;
pub mod scheduler;
pub mod service;
pub mod supervisor;
pub mod template;
pub mod utils;
pub mod worker;

pub use collector::{Collector, NullCollector};
pub use errors::{CoreError, ErrorCategory, ValidationError};
pub use load_generator::LoadGenerator;
pub use metrics::{Metrics, MetricsSnapshot};
pub use plan::{HttpMethod, RatePatternKind, Sla, TestPlan, TestPlanDraft};
pub use run::{RunStatus, StopReason, TestRun};
pub use service::Service;

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`
/// (falling back to `log_level`), in either human-readable or JSON form.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
