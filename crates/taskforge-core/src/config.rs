//! Engine settings, loaded from TOML.
//!
//! The catalog file referenced here uses the same serde model as
//! [`crate::catalog::Catalog`]; richer external formats are converted by
//! outside adapters before they reach the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{ForgeError, Result};

/// Root configuration for the TaskForge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scheduler tick cadence in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_seconds: u64,
    /// Terminal runs retained per job.
    #[serde(default = "default_history_per_job")]
    pub history_per_job: usize,
    /// Lines retained in each run's ring buffer.
    #[serde(default = "default_run_log_lines")]
    pub run_log_lines: usize,
    /// Lines retained in the global log tail.
    #[serde(default = "default_global_log_lines")]
    pub global_log_lines: usize,
    /// Seconds between the graceful stop signal and the kill escalation.
    #[serde(default = "default_grace_secs")]
    pub kill_grace_seconds: u64,
    /// Notifications allowed per (job, event kind) per minute.
    #[serde(default = "default_notify_per_minute")]
    pub notifications_per_minute: u32,
    /// Path of the catalog file loaded at startup.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    /// Shell used by the device prelude, normally `adb`.
    #[serde(default = "default_device_shell")]
    pub device_shell: String,
    /// Startup scheduler mode: `"auto"` or `"single"`.
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_tick_secs() -> u64 {
    1
}
fn default_history_per_job() -> usize {
    20
}
fn default_run_log_lines() -> usize {
    1000
}
fn default_global_log_lines() -> usize {
    2000
}
fn default_grace_secs() -> u64 {
    5
}
fn default_notify_per_minute() -> u32 {
    5
}
fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.toml")
}
fn default_device_shell() -> String {
    "adb".into()
}
fn default_mode() -> String {
    "auto".into()
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tick_seconds: default_tick_secs(),
            history_per_job: default_history_per_job(),
            run_log_lines: default_run_log_lines(),
            global_log_lines: default_global_log_lines(),
            kill_grace_seconds: default_grace_secs(),
            notifications_per_minute: default_notify_per_minute(),
            catalog_path: default_catalog_path(),
            device_shell: default_device_shell(),
            mode: default_mode(),
        }
    }
}

impl ForgeConfig {
    /// Load settings from a TOML file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ForgeError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load the catalog file named by `catalog_path`; a missing file
    /// yields an empty catalog.
    pub fn load_catalog(&self) -> Result<Catalog> {
        if !self.catalog_path.exists() {
            let mut catalog = Catalog::default();
            catalog.ensure_default_group();
            return Ok(catalog);
        }
        let content = std::fs::read_to_string(&self.catalog_path)?;
        let mut catalog: Catalog = toml::from_str(&content).map_err(|e| {
            ForgeError::Config(format!(
                "failed to parse {}: {e}",
                self.catalog_path.display()
            ))
        })?;
        catalog.ensure_default_group();
        catalog.validate()?;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_sparse_toml() {
        let cfg: ForgeConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.tick_seconds, 1);
        assert_eq!(cfg.history_per_job, 20);
    }

    #[test]
    fn catalog_toml_round_trip() {
        let toml_text = r#"
            version = 3

            [[groups]]
            name = "emulator"
            max_concurrent = 1

            [[jobs]]
            id = "daily"
            name = "Daily sweep"
            resource_group = "emulator"
            command = ["sweep", "--all"]

            [jobs.trigger]
            type = "scheduled"
            at = "09:00:00"
            window_end = "09:30:00"
        "#;
        let mut catalog: Catalog = toml::from_str(toml_text).unwrap();
        catalog.ensure_default_group();
        catalog.validate().unwrap();
        assert_eq!(catalog.jobs[0].resource_group, "emulator");
        assert_eq!(catalog.jobs[0].trigger.kind(), "scheduled");
    }
}
