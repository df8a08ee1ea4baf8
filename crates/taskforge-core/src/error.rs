//! Error taxonomy for the scheduler.
//!
//! Per-run failures (`Spawn`, `Timeout`, `Keyword`) terminate the run they
//! belong to and count toward its retry budget; they never unwind the
//! scheduler loop. `Config` is raised at catalog-publish time and leaves
//! the previous snapshot in force.

use thiserror::Error;

/// Result alias used across all TaskForge crates.
pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// Invalid job spec or catalog; the offending version is rejected.
    #[error("config error: {0}")]
    Config(String),

    /// Referenced job id does not exist in the catalog.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Referenced resource group does not exist in the catalog.
    #[error("unknown resource group: {0}")]
    UnknownGroup(String),

    /// Referenced run id does not exist in the record store.
    #[error("unknown run: {0}")]
    UnknownRun(u64),

    /// Manual run refused while the scheduler is running in auto mode.
    #[error("scheduler is running in auto mode; stop it or switch to single-task mode")]
    SchedulerBusy,

    /// Child process could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// Run exceeded its configured timeout.
    #[error("run timed out after {0}s")]
    Timeout(u64),

    /// A failure keyword matched in the run's output.
    #[error("failure keyword matched: {0}")]
    Keyword(String),

    /// Run was cancelled before or during execution.
    #[error("run cancelled")]
    Cancelled,

    /// Webhook delivery failed; logged, never propagated to the run.
    #[error("notification delivery failed: {0}")]
    Notify(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// Stable machine-readable code for the HTTP error shape.
    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::Config(_) => "invalid_spec",
            ForgeError::UnknownJob(_) => "unknown_job",
            ForgeError::UnknownGroup(_) => "unknown_group",
            ForgeError::UnknownRun(_) => "unknown_run",
            ForgeError::SchedulerBusy => "scheduler_busy",
            ForgeError::Spawn(_) => "spawn_failed",
            ForgeError::Timeout(_) => "timeout",
            ForgeError::Keyword(_) => "keyword_failure",
            ForgeError::Cancelled => "cancelled",
            ForgeError::Notify(_) => "notify_failed",
            ForgeError::Io(_) => "io_error",
        }
    }
}
