//! # TaskForge Engine
//!
//! The scheduling and execution core: trigger evaluation, the priority
//! queue with resource-group admission, subprocess supervision with
//! keyword-driven side effects, the retry/success-repeat state machine,
//! webhook notification, and the engine loop that ties them together.
//!
//! ```text
//! Scheduler tick (dedicated worker)
//!   ├── reap finished runs ← channel ← supervisor workers
//!   ├── plan due fires (trigger evaluator, coalescing)
//!   └── admit from the priority queue under group caps + mode
//!
//! Supervisor worker (one per running subprocess)
//!   ├── emulator prelude → payload steps → child process group
//!   ├── stdout/stderr line streaming → run ring + global log + scanner
//!   └── timeout / cancel → graceful signal → kill after grace
//! ```

pub mod engine;
pub mod groups;
pub mod notify;
pub mod queue;
pub mod retry;
pub mod run;
pub mod scanner;
pub mod steps;
pub mod store;
pub mod supervisor;
pub mod trigger;

pub use engine::{Engine, EngineStatus, JobDetail, JobSummary, SchedulerMode};
pub use groups::{GroupSummary, ResourceGroupTable};
pub use notify::{
    HttpWebhookSink, Notifier, NotifyEvent, NullSink, RecordingSink, WebhookSink,
};
pub use queue::{QueuedRun, RunQueue};
pub use retry::{FollowUp, RetryEngine};
pub use run::{FinishReason, Run, RunId, RunOrigin, RunStatus};
pub use scanner::{KeywordHit, KeywordScanner};
pub use store::{EngineEvent, RunRecordStore};
pub use supervisor::{LaunchSpec, RunOutcome, Supervisor};
