//! `TestRun`: identity, status, and the terminal-state machine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub plan_id: String,
    pub status: RunStatus,
    pub stop_reason: Option<StopReason>,
    pub created_at: f64,
    pub start_at: f64,
    pub end_at: Option<f64>,
}

impl TestRun {
    pub fn new(id: impl Into<String>, plan_id: impl Into<String>, now: f64) -> Self {
        Self {
            id: id.into(),
            plan_id: plan_id.into(),
            status: RunStatus::Running,
            stop_reason: None,
            created_at: now,
            start_at: now,
            end_at: None,
        }
    }

    /// Attempt a transition to a terminal state. Returns `false` without
    /// mutating anything if the run is already terminal — terminal states
    /// are never re-entered or overwritten.
    pub fn transition_to(&mut self, status: RunStatus, reason: StopReason, now: f64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.stop_reason = Some(reason);
        self.end_at = Some(now);
        true
    }
}
