//! Run records — one instance of a job being (or having been) executed.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;

pub type RunId = u64;

/// Where a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    Scheduler,
    Manual,
    FailureRetry,
    SuccessRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Queued run refused by an AUTO→SINGLE transition.
    Preempted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

/// Why a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Child exited on its own; the exit code decides success.
    Exit,
    Timeout,
    Cancel,
    /// Child was killed by a signal it did not ask for.
    Signal,
    /// Child could not be started.
    Spawn,
    /// The emulator prelude failed before the main command launched.
    Prelude,
    /// A non-command step failed.
    Step,
    /// A failure keyword forced the terminal state.
    Keyword,
    /// Queue-side terminal states (cancel before start, preemption).
    NeverStarted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: String,
    pub job_name: String,
    pub origin: RunOrigin,
    /// 1-indexed within the run's origin chain.
    pub attempt: u32,
    /// Effective priority (manual runs are boosted past the catalog).
    pub priority: i32,
    pub resource_group: String,
    pub scheduled_for: DateTime<Local>,
    pub enqueued_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    pub reason: Option<FinishReason>,
    pub keyword_hits: Vec<String>,
    /// Wall time of the fire that opened the current window; bounds
    /// success-repeats.
    pub window_origin_fire: Option<DateTime<Local>>,
    /// Ring buffer of the most recent output lines.
    pub last_lines: VecDeque<String>,
}

impl Run {
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    pub fn push_line(&mut self, line: String, cap: usize) {
        if self.last_lines.len() >= cap {
            self.last_lines.pop_front();
        }
        self.last_lines.push_back(line);
    }
}
