//! The declarative job catalog — the data model every other component
//! consumes.
//!
//! A [`Catalog`] is published atomically to the engine: validation happens
//! at publish time and a rejected version leaves the previous snapshot in
//! force. Runs reference jobs by id only; the catalog owns the jobs.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

pub const PRIORITY_MIN: i32 = -100;
pub const PRIORITY_MAX: i32 = 100;

/// When and how a job's next run fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Standard five-field cron expression (minute hour dom month dow).
    Cron { expression: String },
    /// Fixed interval from the previous fire: `"30s"`, `"5m"`, `"9.5h"`.
    Interval { every: String },
    /// One fire per day, uniformly random inside `[start, end]`.
    RandomWindow { start: NaiveTime, end: NaiveTime },
    /// Daily at a fixed time, optionally with a window end that bounds
    /// success-repeats.
    Scheduled {
        at: NaiveTime,
        #[serde(default)]
        window_end: Option<NaiveTime>,
    },
    /// Weekly on the given days (0 = Monday .. 6 = Sunday).
    Weekly {
        days: Vec<u32>,
        at: NaiveTime,
        #[serde(default)]
        window_end: Option<NaiveTime>,
    },
    /// Monthly on the given days of month (1..=31).
    Monthly {
        days: Vec<u32>,
        at: NaiveTime,
        #[serde(default)]
        window_end: Option<NaiveTime>,
    },
    /// A single absolute instant; never fires once it is in the past.
    SpecificDate { at: NaiveDateTime },
}

impl TriggerSpec {
    /// Window end for triggers that carry one; success-repeats are only
    /// legal for these.
    pub fn window_end(&self) -> Option<NaiveTime> {
        match self {
            TriggerSpec::Scheduled { window_end, .. }
            | TriggerSpec::Weekly { window_end, .. }
            | TriggerSpec::Monthly { window_end, .. } => *window_end,
            TriggerSpec::RandomWindow { end, .. } => Some(*end),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::Cron { .. } => "cron",
            TriggerSpec::Interval { .. } => "interval",
            TriggerSpec::RandomWindow { .. } => "random_window",
            TriggerSpec::Scheduled { .. } => "scheduled",
            TriggerSpec::Weekly { .. } => "weekly",
            TriggerSpec::Monthly { .. } => "monthly",
            TriggerSpec::SpecificDate { .. } => "specific_date",
        }
    }
}

/// Parse a suffixed interval string into a duration.
///
/// Accepts `s`/`m`/`h` suffixes and decimal values (`"9.5h"`); a bare
/// number means hours.
pub fn parse_interval(text: &str) -> Result<chrono::Duration> {
    let text = text.trim().to_ascii_lowercase();
    let (value, unit_secs) = if let Some(v) = text.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = text.strip_suffix('m') {
        (v, 60.0)
    } else if let Some(v) = text.strip_suffix('h') {
        (v, 3600.0)
    } else {
        (text.as_str(), 3600.0)
    };

    let value: f64 = value
        .parse()
        .map_err(|_| ForgeError::Config(format!("invalid interval: {text:?}")))?;
    let secs = value * unit_secs;
    if !(secs >= 1.0 && secs.is_finite()) {
        return Err(ForgeError::Config(format!(
            "interval must be at least one second: {text:?}"
        )));
    }
    Ok(chrono::Duration::milliseconds((secs * 1000.0) as i64))
}

/// Failure retry and in-window success-repeat policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_failure_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub failure_retry_delay_seconds: u64,
    /// Emit a single retry-alert notification after this many consecutive
    /// failures of one lineage.
    #[serde(default)]
    pub notify_after_retries: Option<u32>,
    /// When false, retries skip the emulator prelude.
    #[serde(default = "bool_true")]
    pub rerun_prelude_on_retry: bool,
    #[serde(default)]
    pub success_repeat_within_window: bool,
    #[serde(default = "default_repeat_delay")]
    pub success_repeat_delay_seconds: u64,
    #[serde(default = "default_repeat_max")]
    pub success_repeat_max: u32,
}

fn default_retry_delay() -> u64 {
    60
}
fn default_repeat_delay() -> u64 {
    60
}
fn default_repeat_max() -> u32 {
    3
}
fn bool_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_failure_retries: 0,
            failure_retry_delay_seconds: default_retry_delay(),
            notify_after_retries: None,
            rerun_prelude_on_retry: true,
            success_repeat_within_window: false,
            success_repeat_delay_seconds: default_repeat_delay(),
            success_repeat_max: default_repeat_max(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeywordKind {
    /// Advisory; never overrides a non-zero exit.
    Success,
    /// Forces the run to `failed` regardless of exit code.
    Failure,
    /// Fires the keyword notification; does not affect status.
    Alert,
}

/// One keyword rule applied to every output line of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRule {
    pub patterns: Vec<String>,
    pub kind: KeywordKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Cancel the still-running process on the first failure hit.
    #[serde(default)]
    pub abort_on_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyFlags {
    #[serde(default)]
    pub on_start: bool,
    #[serde(default)]
    pub on_success: bool,
    #[serde(default = "bool_true")]
    pub on_failure: bool,
    #[serde(default)]
    pub on_keyword: bool,
}

impl Default for NotifyFlags {
    fn default() -> Self {
        Self {
            on_start: false,
            on_success: false,
            on_failure: true,
            on_keyword: false,
        }
    }
}

/// Emulator pre-steps synthesized ahead of the main command: connect +
/// wake the device, optionally assert the display resolution, optionally
/// launch an app through the device shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prelude {
    pub device_id: String,
    #[serde(default = "bool_true")]
    pub wake_device: bool,
    #[serde(default)]
    pub target_resolution: Option<String>,
    #[serde(default)]
    pub launch_package: Option<String>,
    #[serde(default)]
    pub launch_activity: Option<String>,
    #[serde(default)]
    pub launch_delay_seconds: u64,
}

/// One step of a job's payload. A job runs its steps sequentially; a
/// failing step fails the run unless it opted into `continue_on_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Command {
        argv: Vec<String>,
        #[serde(default)]
        continue_on_error: bool,
    },
    FileWrite {
        path: PathBuf,
        contents: String,
        #[serde(default)]
        continue_on_error: bool,
    },
    FileRead {
        path: PathBuf,
        #[serde(default)]
        continue_on_error: bool,
    },
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        #[serde(default)]
        continue_on_error: bool,
    },
    FileDelete {
        path: PathBuf,
        #[serde(default)]
        continue_on_error: bool,
    },
    HttpGet {
        url: String,
        #[serde(default)]
        continue_on_error: bool,
    },
    HttpPost {
        url: String,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        continue_on_error: bool,
    },
    WebhookSend {
        template: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        continue_on_error: bool,
    },
    DeviceWake {
        device_id: String,
        #[serde(default)]
        continue_on_error: bool,
    },
    DeviceLaunchApp {
        device_id: String,
        package: String,
        #[serde(default)]
        activity: Option<String>,
        #[serde(default)]
        continue_on_error: bool,
    },
    Sleep {
        seconds: u64,
    },
    ResolutionCheck {
        device_id: String,
        expected: String,
        #[serde(default)]
        continue_on_error: bool,
    },
}

impl Step {
    pub fn continue_on_error(&self) -> bool {
        match self {
            Step::Command {
                continue_on_error, ..
            }
            | Step::FileWrite {
                continue_on_error, ..
            }
            | Step::FileRead {
                continue_on_error, ..
            }
            | Step::FileCopy {
                continue_on_error, ..
            }
            | Step::FileDelete {
                continue_on_error, ..
            }
            | Step::HttpGet {
                continue_on_error, ..
            }
            | Step::HttpPost {
                continue_on_error, ..
            }
            | Step::WebhookSend {
                continue_on_error, ..
            }
            | Step::DeviceWake {
                continue_on_error, ..
            }
            | Step::DeviceLaunchApp {
                continue_on_error, ..
            }
            | Step::ResolutionCheck {
                continue_on_error, ..
            } => *continue_on_error,
            Step::Sleep { .. } => false,
        }
    }
}

/// A named concurrency pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceGroupSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    1
}

/// A runnable task as the operator declared it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Lower value = higher priority; ties break on earliest fire, then id.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_group_name")]
    pub resource_group: String,
    pub trigger: TriggerSpec,
    /// Argv of the main command. May be empty when `steps` carries the
    /// whole payload.
    #[serde(default)]
    pub command: Vec<String>,
    /// Optional richer payload, run sequentially before/instead of
    /// `command`.
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Merged over the scheduler's own environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// 0 = no timeout.
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub keywords: Vec<KeywordRule>,
    #[serde(default)]
    pub notify: NotifyFlags,
    #[serde(default)]
    pub prelude: Option<Prelude>,
}

fn default_group_name() -> String {
    "default".into()
}

impl Job {
    fn validate(&self, groups: &HashSet<&str>) -> Result<()> {
        if self.id.is_empty() {
            return Err(ForgeError::Config("job id must not be empty".into()));
        }
        if !groups.contains(self.resource_group.as_str()) {
            return Err(ForgeError::UnknownGroup(format!(
                "{} (referenced by job {:?})",
                self.resource_group, self.id
            )));
        }
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&self.priority) {
            return Err(ForgeError::Config(format!(
                "job {:?}: priority {} outside {}..={}",
                self.id, self.priority, PRIORITY_MIN, PRIORITY_MAX
            )));
        }
        if self.command.is_empty() && self.steps.is_empty() {
            return Err(ForgeError::Config(format!(
                "job {:?} has neither a command nor steps",
                self.id
            )));
        }
        if let TriggerSpec::Interval { every } = &self.trigger {
            parse_interval(every)
                .map_err(|e| ForgeError::Config(format!("job {:?}: {e}", self.id)))?;
        }
        if let TriggerSpec::RandomWindow { start, end } = &self.trigger {
            if start == end {
                return Err(ForgeError::Config(format!(
                    "job {:?}: random window must not be empty",
                    self.id
                )));
            }
        }
        if let TriggerSpec::Weekly { days, .. } = &self.trigger {
            if days.is_empty() || days.iter().any(|d| *d > 6) {
                return Err(ForgeError::Config(format!(
                    "job {:?}: weekly days must be 0..=6 and non-empty",
                    self.id
                )));
            }
        }
        if let TriggerSpec::Monthly { days, .. } = &self.trigger {
            if days.is_empty() || days.iter().any(|d| !(1..=31).contains(d)) {
                return Err(ForgeError::Config(format!(
                    "job {:?}: monthly days must be 1..=31 and non-empty",
                    self.id
                )));
            }
        }
        if self.retry.success_repeat_within_window && self.trigger.window_end().is_none() {
            return Err(ForgeError::Config(format!(
                "job {:?}: success_repeat_within_window requires a window-bearing trigger",
                self.id
            )));
        }
        for rule in &self.keywords {
            if rule.patterns.is_empty() {
                return Err(ForgeError::Config(format!(
                    "job {:?}: keyword rule with no patterns",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// The full declarative catalog: resource groups plus jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Monotone version; the engine swaps snapshots when it grows.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub groups: Vec<ResourceGroupSpec>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Catalog {
    /// Structural validation, applied before a snapshot is published.
    /// Trigger expressions get their full parse check in the engine.
    pub fn validate(&self) -> Result<()> {
        let mut group_names: HashSet<&str> = HashSet::new();
        for group in &self.groups {
            if group.max_concurrent < 1 {
                return Err(ForgeError::Config(format!(
                    "group {:?}: max_concurrent must be at least 1",
                    group.name
                )));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ForgeError::Config(format!(
                    "duplicate resource group {:?}",
                    group.name
                )));
            }
        }
        group_names.insert("default");

        let mut job_ids = HashSet::new();
        for job in &self.jobs {
            if !job_ids.insert(job.id.as_str()) {
                return Err(ForgeError::Config(format!("duplicate job id {:?}", job.id)));
            }
            job.validate(&group_names)?;
        }
        Ok(())
    }

    /// Append the implicit `default` group when the catalog doesn't
    /// declare one.
    pub fn ensure_default_group(&mut self) {
        if !self.groups.iter().any(|g| g.name == "default") {
            self.groups.push(ResourceGroupSpec {
                name: "default".into(),
                description: "implicit default group".into(),
                max_concurrent: 1,
            });
        }
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn group(&self, name: &str) -> Option<&ResourceGroupSpec> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_job(id: &str) -> Job {
        Job {
            id: id.into(),
            name: id.into(),
            enabled: true,
            priority: 0,
            resource_group: "default".into(),
            trigger: TriggerSpec::Interval {
                every: "5m".into(),
            },
            command: vec!["echo".into(), "hi".into()],
            steps: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
            timeout_seconds: 0,
            retry: RetryPolicy::default(),
            keywords: Vec::new(),
            notify: NotifyFlags::default(),
            prelude: None,
        }
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("30s").unwrap(), chrono::Duration::seconds(30));
        assert_eq!(parse_interval("5m").unwrap(), chrono::Duration::minutes(5));
        assert_eq!(
            parse_interval("9.5h").unwrap(),
            chrono::Duration::minutes(570)
        );
        // Bare numbers are hours.
        assert_eq!(parse_interval("2").unwrap(), chrono::Duration::hours(2));
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let catalog = Catalog {
            version: 1,
            groups: vec![],
            jobs: vec![minimal_job("a"), minimal_job("a")],
        };
        assert!(matches!(catalog.validate(), Err(ForgeError::Config(_))));
    }

    #[test]
    fn unknown_group_rejected() {
        let mut job = minimal_job("a");
        job.resource_group = "gpu".into();
        let catalog = Catalog {
            version: 1,
            groups: vec![],
            jobs: vec![job],
        };
        assert!(matches!(
            catalog.validate(),
            Err(ForgeError::UnknownGroup(_))
        ));
    }

    #[test]
    fn repeat_requires_window() {
        let mut job = minimal_job("a");
        job.retry.success_repeat_within_window = true;
        let catalog = Catalog {
            version: 1,
            groups: vec![],
            jobs: vec![job.clone()],
        };
        assert!(catalog.validate().is_err());

        job.trigger = TriggerSpec::Scheduled {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap()),
        };
        let catalog = Catalog {
            version: 1,
            groups: vec![],
            jobs: vec![job],
        };
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn priority_bounds_enforced() {
        let mut job = minimal_job("a");
        job.priority = 101;
        let catalog = Catalog {
            version: 1,
            groups: vec![],
            jobs: vec![job],
        };
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn trigger_round_trips_through_serde() {
        let trigger = TriggerSpec::Weekly {
            days: vec![0, 4],
            at: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            window_end: None,
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains("\"weekly\""));
        let back: TriggerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trigger);
    }
}
