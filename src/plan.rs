//! `TestPlan`: the immutable, validated description of one load test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::rate_shaper::RateStep;

/// Upper bound on `users` enforced during validation; mirrored by
/// `Config::max_workers` so a deployment can tighten it further.
pub const MAX_USERS: usize = 10_000;
pub const MAX_DURATION_SECONDS: u64 = 86_400;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatePatternKind {
    Fixed,
    Step,
    Ramp,
    Spike,
}

/// Service-level thresholds whose first breach terminates a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Sla {
    pub max_p95_ms: f64,
    pub max_p99_ms: f64,
    pub max_error_rate_pct: f64,
    pub min_rps: f64,
}

/// Immutable once accepted by `create_test_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub id: String,
    pub name: String,
    pub target_url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub users: usize,
    pub ramp_up_seconds: u64,
    pub duration_seconds: u64,
    pub timeout_ms: u64,
    pub target_rps: f64,
    pub rate_pattern: RatePatternKind,
    pub rate_steps: Vec<RateStep>,
    pub sla: Option<Sla>,
}

/// A not-yet-validated, not-yet-identified plan as supplied by a caller to
/// `create_test_plan`.
#[derive(Debug, Clone, Default)]
pub struct TestPlanDraft {
    pub name: String,
    pub target_url: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub users: usize,
    pub ramp_up_seconds: u64,
    pub duration_seconds: u64,
    pub timeout_ms: Option<u64>,
    pub target_rps: f64,
    pub rate_pattern: Option<RatePatternKind>,
    pub rate_steps: Vec<RateStep>,
    pub sla: Option<Sla>,
}

impl TestPlan {
    /// Validate a draft and fill defaults (`timeout_ms` → `default_timeout_ms`,
    /// `rate_pattern` → fixed), per the `create_test_plan` contract.
    pub fn from_draft(
        id: impl Into<String>,
        draft: TestPlanDraft,
        default_timeout_ms: u64,
        max_users: usize,
    ) -> Result<Self, ValidationError> {
        if draft.name.trim().is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }

        let parsed_url = url_scheme(&draft.target_url)
            .ok_or_else(|| ValidationError::new("target_url", "not a parseable http/https URL"))?;
        if parsed_url != "http" && parsed_url != "https" {
            return Err(ValidationError::new(
                "target_url",
                "scheme must be http or https",
            ));
        }

        let method = match draft.method.as_deref() {
            None => HttpMethod::Get,
            Some(m) => HttpMethod::parse(m)
                .ok_or_else(|| ValidationError::new("method", format!("unknown method '{m}'")))?,
        };

        if draft.users < 1 || draft.users > max_users {
            return Err(ValidationError::new(
                "users",
                format!("must be in [1, {max_users}]"),
            ));
        }

        if draft.duration_seconds < 1 || draft.duration_seconds > MAX_DURATION_SECONDS {
            return Err(ValidationError::new(
                "duration_seconds",
                format!("must be in [1, {MAX_DURATION_SECONDS}]"),
            ));
        }

        let timeout_ms = draft.timeout_ms.unwrap_or(default_timeout_ms);
        if timeout_ms > MAX_TIMEOUT_MS {
            return Err(ValidationError::new(
                "timeout_ms",
                format!("must be in [0, {MAX_TIMEOUT_MS}]"),
            ));
        }

        if draft.target_rps < 0.0 {
            return Err(ValidationError::new("target_rps", "must be >= 0"));
        }

        // An empty rate_steps list for `step` degrades to fixed at runtime,
        // but is still accepted input here, not an error.
        let rate_pattern = draft.rate_pattern.unwrap_or(RatePatternKind::Fixed);

        for step in &draft.rate_steps {
            if step.rps < 0.0 {
                return Err(ValidationError::new("rate_steps[].rps", "must be >= 0"));
            }
            if step.duration_secs < 1 {
                return Err(ValidationError::new(
                    "rate_steps[].duration_secs",
                    "must be >= 1",
                ));
            }
        }

        if let Some(sla) = &draft.sla {
            if sla.max_p95_ms < 0.0
                || sla.max_p99_ms < 0.0
                || sla.min_rps < 0.0
                || sla.max_error_rate_pct < 0.0
                || sla.max_error_rate_pct > 100.0
            {
                return Err(ValidationError::new(
                    "sla",
                    "all thresholds must be non-negative and max_error_rate_pct in [0, 100]",
                ));
            }
        }

        for name in draft.headers.keys() {
            if name.trim().is_empty() {
                return Err(ValidationError::new("headers", "header name must not be empty"));
            }
        }

        Ok(TestPlan {
            id: id.into(),
            name: draft.name,
            target_url: draft.target_url,
            method,
            headers: draft.headers,
            body: draft.body,
            users: draft.users,
            ramp_up_seconds: draft.ramp_up_seconds,
            duration_seconds: draft.duration_seconds,
            timeout_ms,
            target_rps: draft.target_rps,
            rate_pattern,
            rate_steps: draft.rate_steps,
            sla: draft.sla,
        })
    }
}

/// Extract the scheme of a URL without pulling in a full URL-parsing crate;
/// returns `None` if there's no `scheme://` prefix at all.
fn url_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_draft() -> TestPlanDraft {
        TestPlanDraft {
            name: "smoke".into(),
            target_url: "http://localhost:8080/ping".into(),
            users: 5,
            duration_seconds: 10,
            ..Default::default()
        }
    }

    #[test]
    fn minimal_draft_validates_and_fills_defaults() {
        let plan = TestPlan::from_draft("run-1", minimal_draft(), 5_000, MAX_USERS).unwrap();
        assert_eq!(plan.timeout_ms, 5_000);
        assert_eq!(plan.rate_pattern, RatePatternKind::Fixed);
        assert_eq!(plan.method, HttpMethod::Get);
    }

    #[test]
    fn rejects_empty_name() {
        let mut draft = minimal_draft();
        draft.name = "  ".into();
        let err = TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut draft = minimal_draft();
        draft.target_url = "ftp://example.com/file".into();
        let err = TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).unwrap_err();
        assert_eq!(err.field, "target_url");
    }

    #[test]
    fn rejects_users_out_of_range() {
        let mut draft = minimal_draft();
        draft.users = 0;
        assert!(TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).is_err());

        let mut draft = minimal_draft();
        draft.users = MAX_USERS + 1;
        assert!(TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).is_err());
    }

    #[test]
    fn rejects_unknown_method() {
        let mut draft = minimal_draft();
        draft.method = Some("FETCH".into());
        let err = TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).unwrap_err();
        assert_eq!(err.field, "method");
    }

    #[test]
    fn rejects_invalid_sla_error_rate() {
        let mut draft = minimal_draft();
        draft.sla = Some(Sla {
            max_error_rate_pct: 150.0,
            ..Default::default()
        });
        assert!(TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).is_err());
    }

    #[test]
    fn rejects_invalid_rate_step() {
        let mut draft = minimal_draft();
        draft.rate_pattern = Some(RatePatternKind::Step);
        draft.rate_steps = vec![RateStep {
            rps: -1.0,
            duration_secs: 5,
        }];
        assert!(TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).is_err());
    }

    #[test]
    fn step_pattern_with_no_steps_is_accepted_as_input() {
        let mut draft = minimal_draft();
        draft.rate_pattern = Some(RatePatternKind::Step);
        let plan = TestPlan::from_draft("run-1", draft, 5_000, MAX_USERS).unwrap();
        assert!(plan.rate_steps.is_empty());
    }
}
