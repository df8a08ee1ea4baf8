//! Notifier — turns engine state transitions into webhook deliveries.
//!
//! The notifier runs on its own worker and never blocks the scheduler;
//! delivery failures are logged and dropped. The concrete transport sits
//! behind [`WebhookSink`], so tests inject a recording sink and the
//! production build posts to the configured push service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskforge_core::clock::Clock;
use taskforge_core::error::{ForgeError, Result};

use crate::run::RunId;

/// Window for the per-(job, kind) rate limit.
const RATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub enum NotifyEvent {
    RunStarted {
        job_id: String,
        job_name: String,
        run_id: RunId,
    },
    RunSucceeded {
        job_id: String,
        job_name: String,
        run_id: RunId,
        duration_secs: f64,
    },
    RunFailed {
        job_id: String,
        job_name: String,
        run_id: RunId,
        reason: String,
    },
    KeywordHit {
        job_id: String,
        job_name: String,
        run_id: RunId,
        message: String,
        line: String,
    },
    /// One lineage crossed its retry-alert threshold.
    RetryAlert {
        job_id: String,
        job_name: String,
        failures: u32,
        max_retries: u32,
    },
    SchedulerStarted,
    SchedulerStopped,
    ModeChanged {
        mode: String,
    },
    Test {
        title: String,
        message: String,
    },
}

impl NotifyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyEvent::RunStarted { .. } => "run_started",
            NotifyEvent::RunSucceeded { .. } => "run_succeeded",
            NotifyEvent::RunFailed { .. } => "run_failed",
            NotifyEvent::KeywordHit { .. } => "keyword_hit",
            NotifyEvent::RetryAlert { .. } => "retry_alert",
            NotifyEvent::SchedulerStarted => "scheduler_started",
            NotifyEvent::SchedulerStopped => "scheduler_stopped",
            NotifyEvent::ModeChanged { .. } => "mode_changed",
            NotifyEvent::Test { .. } => "test",
        }
    }

    fn job_id(&self) -> Option<&str> {
        match self {
            NotifyEvent::RunStarted { job_id, .. }
            | NotifyEvent::RunSucceeded { job_id, .. }
            | NotifyEvent::RunFailed { job_id, .. }
            | NotifyEvent::KeywordHit { job_id, .. }
            | NotifyEvent::RetryAlert { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    fn title_and_body(&self) -> (String, String) {
        match self {
            NotifyEvent::RunStarted { job_name, run_id, .. } => (
                format!("Run started: {job_name}"),
                format!("Run #{run_id} of '{job_name}' has started."),
            ),
            NotifyEvent::RunSucceeded {
                job_name,
                run_id,
                duration_secs,
                ..
            } => (
                format!("Run succeeded: {job_name}"),
                format!("Run #{run_id} of '{job_name}' completed in {duration_secs:.1}s."),
            ),
            NotifyEvent::RunFailed {
                job_name,
                run_id,
                reason,
                ..
            } => (
                format!("Run failed: {job_name}"),
                format!("Run #{run_id} of '{job_name}' failed ({reason})."),
            ),
            NotifyEvent::KeywordHit {
                job_name,
                message,
                line,
                ..
            } => (
                format!("Keyword alert: {job_name}"),
                format!("{message}\n\n{line}"),
            ),
            NotifyEvent::RetryAlert {
                job_name,
                failures,
                max_retries,
                ..
            } => (
                format!("Retrying: {job_name}"),
                format!(
                    "'{job_name}' failed {failures} times in a row; retrying automatically (max {max_retries})."
                ),
            ),
            NotifyEvent::SchedulerStarted => {
                ("Scheduler started".into(), "The scheduler is running.".into())
            }
            NotifyEvent::SchedulerStopped => {
                ("Scheduler stopped".into(), "The scheduler has stopped.".into())
            }
            NotifyEvent::ModeChanged { mode } => (
                "Scheduler mode changed".into(),
                format!("The scheduler switched to {mode} mode."),
            ),
            NotifyEvent::Test { title, message } => (title.clone(), message.clone()),
        }
    }
}

/// The webhook transport seam. One method; the engine treats the concrete
/// delivery as opaque.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn deliver(&self, template: &str, variables: &HashMap<String, String>) -> Result<()>;
}

/// Production sink: posts to a push service as
/// `{base_url}/{token}.send` with form fields title/desp/channel.
/// Credentials come from `WEBHOOK_BASE_URL`, `WEBHOOK_TOKEN`,
/// `WEBHOOK_UID`.
pub struct HttpWebhookSink {
    client: reqwest::Client,
    base_url: String,
    token: String,
    uid: String,
}

impl HttpWebhookSink {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("WEBHOOK_BASE_URL").ok()?;
        let token = std::env::var("WEBHOOK_TOKEN").ok()?;
        let uid = std::env::var("WEBHOOK_UID").unwrap_or_default();
        Some(Self {
            client: reqwest::Client::new(),
            base_url,
            token,
            uid,
        })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn deliver(&self, template: &str, variables: &HashMap<String, String>) -> Result<()> {
        let url = format!("{}/{}.send", self.base_url.trim_end_matches('/'), self.token);
        let empty = String::new();
        let form = [
            ("title", variables.get("title").unwrap_or(&empty)),
            ("desp", variables.get("body").unwrap_or(&empty)),
            ("channel", variables.get("channel").unwrap_or(&empty)),
            ("uid", &self.uid),
        ];
        let response = self
            .client
            .post(&url)
            .form(&form)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ForgeError::Notify(format!("{template}: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ForgeError::Notify(format!(
                "{template}: HTTP {}",
                response.status()
            )))
        }
    }
}

/// Sink used when no webhook credentials are configured.
pub struct NullSink;

#[async_trait]
impl WebhookSink for NullSink {
    async fn deliver(&self, template: &str, _variables: &HashMap<String, String>) -> Result<()> {
        debug!(template, "webhook credentials not configured, dropping notification");
        Ok(())
    }
}

/// Test sink that records every delivery.
#[derive(Default)]
pub struct RecordingSink {
    pub deliveries: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl RecordingSink {
    pub fn templates(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(template, _)| template.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookSink for RecordingSink {
    async fn deliver(&self, template: &str, variables: &HashMap<String, String>) -> Result<()> {
        self.deliveries
            .lock()
            .unwrap()
            .push((template.to_string(), variables.clone()));
        Ok(())
    }
}

struct RateWindow {
    opened_at: DateTime<Local>,
    sent: u32,
    suppressed: u32,
}

/// Formats events, applies the per-(job, kind) rate limit, and hands off
/// to the sink.
pub struct Notifier {
    sink: Arc<dyn WebhookSink>,
    clock: Arc<dyn Clock>,
    per_minute: u32,
    windows: Mutex<HashMap<(String, &'static str), RateWindow>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn WebhookSink>, clock: Arc<dyn Clock>, per_minute: u32) -> Self {
        Self {
            sink,
            clock,
            per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, event: NotifyEvent) {
        let now = self.clock.now();
        let key = (
            event.job_id().unwrap_or("-").to_string(),
            event.kind(),
        );

        let (allowed, summary) = {
            let mut windows = self.windows.lock().unwrap();
            let window = windows.entry(key.clone()).or_insert(RateWindow {
                opened_at: now,
                sent: 0,
                suppressed: 0,
            });

            let mut summary = None;
            if (now - window.opened_at).num_seconds() >= RATE_WINDOW_SECS {
                if window.suppressed > 0 {
                    summary = Some((window.suppressed, key.0.clone(), key.1));
                }
                window.opened_at = now;
                window.sent = 0;
                window.suppressed = 0;
            }

            let allowed = window.sent < self.per_minute;
            if allowed {
                window.sent += 1;
            } else {
                window.suppressed += 1;
            }
            (allowed, summary)
        };

        if let Some((count, job_id, kind)) = summary {
            let mut variables = HashMap::new();
            variables.insert("title".to_string(), format!("Suppressed {kind} events"));
            variables.insert(
                "body".to_string(),
                format!("{count} {kind} notifications for '{job_id}' were rate-limited in the last minute."),
            );
            variables.insert("channel".to_string(), "rate_limit".to_string());
            if let Err(e) = self.sink.deliver("rate_limit_summary", &variables).await {
                warn!(error = %e, "summary notification delivery failed");
            }
        }

        if !allowed {
            debug!(kind = event.kind(), "notification rate-limited");
            return;
        }

        let (title, body) = event.title_and_body();
        let mut variables = HashMap::new();
        variables.insert("title".to_string(), title);
        variables.insert("body".to_string(), body);
        variables.insert("channel".to_string(), event.kind().to_string());
        if let Some(job_id) = event.job_id() {
            variables.insert("job_id".to_string(), job_id.to_string());
        }

        if let Err(e) = self.sink.deliver(event.kind(), &variables).await {
            warn!(kind = event.kind(), error = %e, "notification delivery failed");
        }
    }
}

/// Drain events from the engine on a dedicated worker so webhook latency
/// never stalls a tick.
pub fn spawn_notify_worker(
    notifier: Arc<Notifier>,
    mut events: mpsc::UnboundedReceiver<NotifyEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            notifier.publish(event).await;
        }
        info!("notify worker shut down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use taskforge_core::clock::ManualClock;

    fn started(job: &str, run_id: RunId) -> NotifyEvent {
        NotifyEvent::RunStarted {
            job_id: job.into(),
            job_name: job.into(),
            run_id,
        }
    }

    #[tokio::test]
    async fn delivers_with_title_and_body() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = Notifier::new(sink.clone(), clock, 5);

        notifier.publish(started("backup", 3)).await;

        let deliveries = sink.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "run_started");
        assert!(deliveries[0].1["title"].contains("backup"));
        assert!(deliveries[0].1["body"].contains("#3"));
    }

    #[tokio::test]
    async fn rate_limit_suppresses_overflow_and_summarizes() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = Notifier::new(sink.clone(), clock.clone(), 2);

        for i in 0..5 {
            notifier.publish(started("noisy", i)).await;
        }
        assert_eq!(sink.deliveries.lock().unwrap().len(), 2);

        // The window closes; the next publish emits the summary first.
        clock.advance(Duration::from_secs(61));
        notifier.publish(started("noisy", 99)).await;

        let templates = sink.templates();
        assert_eq!(
            templates,
            vec!["run_started", "run_started", "rate_limit_summary", "run_started"]
        );
    }

    #[tokio::test]
    async fn rate_limit_is_keyed_per_job_and_kind() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = Notifier::new(sink.clone(), clock, 1);

        notifier.publish(started("a", 1)).await;
        notifier.publish(started("a", 2)).await; // suppressed
        notifier.publish(started("b", 3)).await; // different job, allowed
        notifier
            .publish(NotifyEvent::RunFailed {
                job_id: "a".into(),
                job_name: "a".into(),
                run_id: 4,
                reason: "timeout".into(),
            })
            .await; // different kind, allowed

        assert_eq!(sink.deliveries.lock().unwrap().len(), 3);
    }
}
