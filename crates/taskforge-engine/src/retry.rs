//! Retry / success-repeat engine.
//!
//! Invoked at every terminal transition; decides whether the finished run
//! yields another pending run. Failure retries continue a lineage up to
//! the policy cap; completed runs of window-bearing triggers may repeat
//! inside their window. Cancellation yields nothing and does not touch the
//! failure counter.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local};

use taskforge_core::catalog::Job;

use crate::notify::NotifyEvent;
use crate::run::{Run, RunOrigin, RunStatus};
use crate::trigger;

/// A follow-up run to enqueue after a terminal transition.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub origin: RunOrigin,
    pub attempt: u32,
    pub scheduled_for: DateTime<Local>,
    pub window_origin_fire: Option<DateTime<Local>>,
    pub skip_prelude: bool,
}

#[derive(Default)]
struct LineageState {
    consecutive_failures: u32,
    alert_sent: bool,
    repeat_count: u32,
}

#[derive(Default)]
pub struct RetryEngine {
    lineages: Mutex<HashMap<String, LineageState>>,
}

impl RetryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler-origin run started a fresh window: repeat counters
    /// start over.
    pub fn on_window_opened(&self, job_id: &str) {
        let mut lineages = self.lineages.lock().unwrap();
        let state = lineages.entry(job_id.to_string()).or_default();
        state.repeat_count = 0;
    }

    /// Decide the follow-up for a terminal run, plus an optional
    /// retry-alert notification when the lineage crosses its threshold.
    pub fn plan_followup(
        &self,
        job: &Job,
        run: &Run,
        now: DateTime<Local>,
    ) -> (Option<FollowUp>, Option<NotifyEvent>) {
        let mut lineages = self.lineages.lock().unwrap();
        let state = lineages.entry(job.id.clone()).or_default();
        let policy = &job.retry;

        match run.status {
            RunStatus::Failed => {
                state.consecutive_failures += 1;

                let mut alert = None;
                if let Some(threshold) = policy.notify_after_retries {
                    if state.consecutive_failures >= threshold && !state.alert_sent {
                        state.alert_sent = true;
                        alert = Some(NotifyEvent::RetryAlert {
                            job_id: job.id.clone(),
                            job_name: job.name.clone(),
                            failures: state.consecutive_failures,
                            max_retries: policy.max_failure_retries,
                        });
                    }
                }

                if state.consecutive_failures <= policy.max_failure_retries {
                    let followup = FollowUp {
                        origin: RunOrigin::FailureRetry,
                        attempt: run.attempt + 1,
                        scheduled_for: now
                            + Duration::seconds(policy.failure_retry_delay_seconds.max(1) as i64),
                        window_origin_fire: run.window_origin_fire,
                        skip_prelude: !policy.rerun_prelude_on_retry,
                    };
                    (Some(followup), alert)
                } else {
                    // Lineage exhausted; the next scheduler fire starts
                    // fresh.
                    state.consecutive_failures = 0;
                    state.alert_sent = false;
                    (None, alert)
                }
            }
            RunStatus::Completed => {
                state.consecutive_failures = 0;
                state.alert_sent = false;

                if !policy.success_repeat_within_window {
                    return (None, None);
                }
                let window_origin = run.window_origin_fire.unwrap_or(run.scheduled_for);
                let Some(window_end) = trigger::window_end_for(&job.trigger, window_origin) else {
                    return (None, None);
                };
                if state.repeat_count >= policy.success_repeat_max {
                    return (None, None);
                }
                let next = now + Duration::seconds(policy.success_repeat_delay_seconds.max(1) as i64);
                if next > window_end {
                    return (None, None);
                }
                state.repeat_count += 1;
                (
                    Some(FollowUp {
                        origin: RunOrigin::SuccessRepeat,
                        attempt: run.attempt + 1,
                        scheduled_for: next,
                        window_origin_fire: Some(window_origin),
                        skip_prelude: false,
                    }),
                    None,
                )
            }
            // Cancellation and preemption never produce follow-ups and do
            // not count against the retry budget.
            _ => (None, None),
        }
    }
}
