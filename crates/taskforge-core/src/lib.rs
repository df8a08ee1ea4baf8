//! # TaskForge Core
//!
//! Shared data model for the TaskForge scheduler: the declarative job
//! catalog, engine settings, the error taxonomy, and the clock seam that
//! every time-dependent component reads from.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;

pub use catalog::{
    Catalog, Job, KeywordKind, KeywordRule, NotifyFlags, Prelude, ResourceGroupSpec, RetryPolicy,
    Step, TriggerSpec,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ForgeConfig;
pub use error::{ForgeError, Result};
