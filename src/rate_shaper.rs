//! Emits dispatch tokens over time according to a rate pattern.
//!
//! The shaper never blocks on a full channel — it drops the token and moves
//! on. The channel is a back-pressure *signal*, not a work queue: if workers
//! can't keep up, effective throughput falls below `target_rps` and that is
//! observable as `current_rps < target_rps`, exactly as intended.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One phase of a step/spike rate pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStep {
    pub rps: f64,
    pub duration_secs: u64,
}

/// Which of the four token-production modes a plan selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePattern {
    Fixed,
    Step,
    Ramp,
    Spike,
}

/// Default ramp target when a plan selects `ramp` without an explicit
/// `target_rps`.
pub const DEFAULT_RAMP_TARGET_RPS: f64 = 100.0;

/// Smallest interval used for "unbounded" fixed-rate dispatch.
const UNBOUNDED_TICK: Duration = Duration::from_millis(1);

pub struct RateShaper {
    pattern: RatePattern,
    target_rps: f64,
    steps: Vec<RateStep>,
}

impl RateShaper {
    pub fn new(pattern: RatePattern, target_rps: f64, steps: Vec<RateStep>) -> Self {
        Self {
            pattern,
            target_rps,
            steps,
        }
    }

    /// Run until `run_duration` elapses or `cancel` fires, pushing dispatch
    /// tokens into `tx` at the cadence dictated by the configured pattern.
    pub async fn run(&self, tx: mpsc::Sender<()>, cancel: CancellationToken, run_duration: Duration) {
        let deadline = Instant::now() + run_duration;

        match self.pattern {
            RatePattern::Fixed => {
                emit_at_rate(self.target_rps, &tx, &cancel, Some(deadline)).await;
            }
            RatePattern::Step => {
                if self.steps.is_empty() {
                    // Degrade gracefully to fixed-rate.
                    emit_at_rate(self.target_rps, &tx, &cancel, Some(deadline)).await;
                    return;
                }
                self.run_step_sequence(&self.steps, &tx, &cancel, deadline).await;
            }
            RatePattern::Spike => {
                if self.steps.is_empty() {
                    emit_at_rate(self.target_rps, &tx, &cancel, Some(deadline)).await;
                    return;
                }
                // Step 0 is base, step 1 (if present) is the spike; anything
                // beyond index 1 is ignored — spike is a two-phase pattern.
                let sequence: Vec<RateStep> = self.steps.iter().take(2).copied().collect();
                self.run_step_sequence(&sequence, &tx, &cancel, deadline).await;
            }
            RatePattern::Ramp => {
                self.run_ramp(&tx, &cancel, run_duration, deadline).await;
            }
        }
    }

    /// Hold each step's rate for its exact duration, then hold the final
    /// step's rate indefinitely until the root deadline/cancellation.
    async fn run_step_sequence(
        &self,
        steps: &[RateStep],
        tx: &mpsc::Sender<()>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) {
        for step in steps {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return;
            }
            let step_end = Instant::now() + Duration::from_secs(step.duration_secs);
            let step_end = step_end.min(deadline);
            if step.rps <= 0.0 {
                sleep_until_or_cancel(step_end, cancel).await;
            } else {
                emit_at_rate(step.rps, tx, cancel, Some(step_end)).await;
            }
        }

        // Hold the last configured rate indefinitely (until the root
        // deadline or cancellation) once the sequence completes.
        if let Some(last) = steps.last() {
            if !cancel.is_cancelled() && Instant::now() < deadline {
                emit_at_rate(last.rps, tx, cancel, Some(deadline)).await;
            }
        }
    }

    async fn run_ramp(
        &self,
        tx: &mpsc::Sender<()>,
        cancel: &CancellationToken,
        run_duration: Duration,
        deadline: Instant,
    ) {
        let end_rps = if self.target_rps > 0.0 {
            self.target_rps
        } else {
            DEFAULT_RAMP_TARGET_RPS
        };
        let total_secs = run_duration.as_secs_f64();
        let ramp_secs = total_secs / 2.0;
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return;
            }
            let elapsed = Instant::now().duration_since(start).as_secs_f64();
            let current_rps = if ramp_secs <= 0.0 || elapsed >= ramp_secs {
                end_rps
            } else {
                1.0 + (end_rps - 1.0) * (elapsed / ramp_secs)
            };

            let second_end = (Instant::now() + Duration::from_secs(1)).min(deadline);
            emit_at_rate(current_rps, tx, cancel, Some(second_end)).await;
        }
    }
}

/// Push tokens at `rps` (interpreting `rps <= 0.0` as "unbounded, cap by
/// worker pull rate") until `until` (if any) or cancellation.
///
/// Uses absolute-time scheduling (`sleep_until`) rather than repeated
/// relative sleeps, so a slow tick is absorbed instead of permanently
/// skewing the cadence.
async fn emit_at_rate(
    rps: f64,
    tx: &mpsc::Sender<()>,
    cancel: &CancellationToken,
    until: Option<Instant>,
) {
    let period = if rps > 0.0 && rps.is_finite() {
        Duration::from_nanos((1_000_000_000.0 / rps) as u64).max(Duration::from_nanos(1))
    } else {
        UNBOUNDED_TICK
    };

    let mut next_fire = Instant::now();

    loop {
        if let Some(deadline) = until {
            if Instant::now() >= deadline {
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep_until(next_fire) => {}
        }

        if cancel.is_cancelled() {
            return;
        }
        if let Some(deadline) = until {
            if Instant::now() >= deadline {
                return;
            }
        }

        // Back-pressure: drop the token silently if workers are saturated.
        if tx.try_send(()).is_err() {
            debug!("rate shaper dropped a token: channel full");
        }

        next_fire += period;
    }
}

async fn sleep_until_or_cancel(until: Instant, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = time::sleep_until(until) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fixed_rate_emits_tokens_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(1000);
        let cancel = CancellationToken::new();
        let shaper = RateShaper::new(RatePattern::Fixed, 100.0, vec![]);

        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            shaper.run(tx, cancel2, Duration::from_secs(1)).await;
        });

        tokio::time::advance(Duration::from_millis(500)).await;
        handle.await.unwrap();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count > 0, "expected at least one dispatch token");
    }

    #[tokio::test]
    async fn fixed_zero_rps_still_emits_at_unbounded_tick() {
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let shaper = RateShaper::new(RatePattern::Fixed, 0.0, vec![]);

        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            shaper.run(tx, cancel2, Duration::from_millis(20)).await;
        });
        handle.await.unwrap();

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn degrade_to_fixed_on_empty_steps_is_representable() {
        let shaper = RateShaper::new(RatePattern::Step, 10.0, vec![]);
        assert_eq!(shaper.pattern, RatePattern::Step);
        assert!(shaper.steps.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_emission_promptly() {
        let (tx, _rx) = mpsc::channel(1000);
        let cancel = CancellationToken::new();
        let shaper = RateShaper::new(RatePattern::Fixed, 1000.0, vec![]);

        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            shaper.run(tx, cancel2, Duration::from_secs(10)).await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("shaper should stop promptly after cancellation")
            .unwrap();
    }
}
