//! The scheduler engine: tick loop, mode semantics, and the transactional
//! surface the control API calls into.
//!
//! One dedicated worker ticks the engine; one worker per running
//! subprocess streams output and reports exits on a channel the tick
//! drains. API mutations signal the wake channel so catalog changes are
//! observed promptly. A panic inside a tick is caught at the loop
//! boundary and the loop continues.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use taskforge_core::catalog::{Catalog, Job, PRIORITY_MIN};
use taskforge_core::clock::Clock;
use taskforge_core::config::ForgeConfig;
use taskforge_core::error::{ForgeError, Result};

use crate::groups::{GroupSummary, ResourceGroupTable};
use crate::notify::{spawn_notify_worker, Notifier, NotifyEvent, WebhookSink};
use crate::queue::{QueuedRun, RunQueue};
use crate::retry::{FollowUp, RetryEngine};
use crate::run::{FinishReason, Run, RunId, RunOrigin, RunStatus};
use crate::store::{EngineEvent, RunRecordStore};
use crate::supervisor::{LaunchSpec, RunOutcome, Supervisor};
use crate::trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// Admit freely, plan trigger fires.
    Auto,
    /// At most one running run in the whole system; trigger planning is
    /// suspended.
    Single,
}

impl SchedulerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerMode::Auto => "auto",
            SchedulerMode::Single => "single",
        }
    }
}

impl FromStr for SchedulerMode {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(SchedulerMode::Auto),
            "single" => Ok(SchedulerMode::Single),
            other => Err(ForgeError::Config(format!("unknown mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub mode: SchedulerMode,
    pub total_jobs: usize,
    pub running_runs: usize,
    pub queue_depth: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub resource_group: String,
    pub trigger: &'static str,
    pub status: &'static str,
    pub next_run: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub status: &'static str,
    pub next_run: Option<DateTime<Local>>,
    pub history: Vec<Run>,
}

pub struct Engine {
    cfg: ForgeConfig,
    clock: Arc<dyn Clock>,
    catalog: RwLock<Arc<Catalog>>,
    store: Arc<RunRecordStore>,
    groups: ResourceGroupTable,
    queue: RunQueue,
    supervisor: Arc<Supervisor>,
    retry: RetryEngine,
    notify_tx: mpsc::UnboundedSender<NotifyEvent>,
    finished_rx: Mutex<mpsc::UnboundedReceiver<RunOutcome>>,
    running: AtomicBool,
    mode: Mutex<SchedulerMode>,
    wake: Notify,
    /// Planned next fire per job, consumed when due.
    planned: Mutex<HashMap<String, DateTime<Local>>>,
    last_fires: Mutex<HashMap<String, DateTime<Local>>>,
    rng: Mutex<StdRng>,
    started: Instant,
}

impl Engine {
    pub fn new(
        cfg: ForgeConfig,
        mut catalog: Catalog,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn WebhookSink>,
    ) -> Result<Arc<Self>> {
        catalog.ensure_default_group();
        catalog.validate()?;
        for job in &catalog.jobs {
            trigger::validate(&job.trigger)?;
        }
        let mode = SchedulerMode::from_str(&cfg.mode)?;

        let store = Arc::new(RunRecordStore::new(
            cfg.history_per_job,
            cfg.run_log_lines,
            cfg.global_log_lines,
        ));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let notifier = Arc::new(Notifier::new(
            sink.clone(),
            clock.clone(),
            cfg.notifications_per_minute,
        ));
        spawn_notify_worker(notifier, notify_rx);

        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            notify_tx.clone(),
            sink,
            finished_tx,
            cfg.device_shell.clone(),
            Duration::from_secs(cfg.kill_grace_seconds),
        ));

        let groups = ResourceGroupTable::new();
        groups.reload(&catalog.groups);

        Ok(Arc::new(Self {
            clock,
            catalog: RwLock::new(Arc::new(catalog)),
            store,
            groups,
            queue: RunQueue::new(),
            supervisor,
            retry: RetryEngine::new(),
            notify_tx,
            finished_rx: Mutex::new(finished_rx),
            running: AtomicBool::new(false),
            mode: Mutex::new(mode),
            wake: Notify::new(),
            planned: Mutex::new(HashMap::new()),
            last_fires: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            started: Instant::now(),
            cfg,
        }))
    }

    /// Spawn the dedicated scheduler worker. Ticks on the configured
    /// cadence and whenever the wake channel fires.
    pub fn spawn_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(engine.cfg.tick_seconds.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = engine.wake.notified() => {}
                }
                // Contain per-tick panics at the loop boundary.
                let tick = std::panic::AssertUnwindSafe(async { engine.tick() });
                if tick.catch_unwind().await.is_err() {
                    error!("scheduler tick panicked; continuing on the next tick");
                }
            }
        })
    }

    /// One scheduler tick: reap finished runs, plan due fires, admit from
    /// the queue. Public so tests drive the engine deterministically.
    pub fn tick(&self) {
        self.reap_finished();
        if self.running.load(Ordering::SeqCst) && self.mode() == SchedulerMode::Auto {
            self.plan_due_runs();
        }
        self.admit_runs();
    }

    // ------------------------------------------------------------------
    // Tick phases
    // ------------------------------------------------------------------

    fn reap_finished(&self) {
        let outcomes: Vec<RunOutcome> = {
            let mut rx = self.finished_rx.lock().unwrap();
            let mut outcomes = Vec::new();
            while let Ok(outcome) = rx.try_recv() {
                outcomes.push(outcome);
            }
            outcomes
        };
        for outcome in outcomes {
            self.finish_run(outcome);
        }
    }

    fn finish_run(&self, outcome: RunOutcome) {
        let now = self.clock.now();
        let status = match outcome.reason {
            FinishReason::Cancel => RunStatus::Cancelled,
            FinishReason::Exit
                if outcome.exit_code == Some(0) && outcome.failure_keyword.is_none() =>
            {
                RunStatus::Completed
            }
            _ => RunStatus::Failed,
        };

        let Some(run) = self.store.finish(
            outcome.run_id,
            status,
            outcome.reason,
            outcome.exit_code,
            now,
        ) else {
            return;
        };
        self.groups.release(&run.resource_group, run.id);
        self.store.record_event(
            now,
            "run_finished",
            Some(run.id),
            Some(&run.job_id),
            format!("{:?} ({:?})", status, outcome.reason),
        );
        info!(
            run_id = run.id,
            job = %run.job_id,
            status = ?status,
            reason = ?outcome.reason,
            exit_code = ?outcome.exit_code,
            "run finished"
        );

        let job = &outcome.job;
        match status {
            RunStatus::Completed if job.notify.on_success => {
                let _ = self.notify_tx.send(NotifyEvent::RunSucceeded {
                    job_id: job.id.clone(),
                    job_name: job.name.clone(),
                    run_id: run.id,
                    duration_secs: run.duration_seconds().unwrap_or(0.0),
                });
            }
            RunStatus::Failed if job.notify.on_failure => {
                let reason = outcome
                    .failure_keyword
                    .clone()
                    .unwrap_or_else(|| format!("{:?}", outcome.reason).to_lowercase());
                let _ = self.notify_tx.send(NotifyEvent::RunFailed {
                    job_id: job.id.clone(),
                    job_name: job.name.clone(),
                    run_id: run.id,
                    reason,
                });
            }
            _ => {}
        }

        if job.enabled {
            let (followup, alert) = self.retry.plan_followup(job, &run, now);
            if let Some(alert) = alert {
                let _ = self.notify_tx.send(alert);
            }
            if let Some(followup) = followup {
                self.enqueue_followup(job.clone(), followup, now);
            }
        }
    }

    fn enqueue_followup(&self, job: Job, followup: FollowUp, now: DateTime<Local>) {
        let run_id = self.store.create_run(
            &job.id,
            &job.name,
            followup.origin,
            followup.attempt,
            job.priority,
            &job.resource_group,
            followup.scheduled_for,
            now,
            followup.window_origin_fire,
        );
        self.store.record_event(
            now,
            "run_scheduled",
            Some(run_id),
            Some(&job.id),
            format!("{:?} at {}", followup.origin, followup.scheduled_for),
        );
        self.queue.push(QueuedRun {
            run_id,
            origin: followup.origin,
            attempt: followup.attempt,
            priority: job.priority,
            scheduled_for: followup.scheduled_for,
            enqueued_at: now,
            window_origin_fire: followup.window_origin_fire,
            skip_prelude: followup.skip_prelude,
            job,
        });
    }

    fn plan_due_runs(&self) {
        let catalog = self.catalog_snapshot();
        let now = self.clock.now();

        for job in catalog.jobs.iter().filter(|job| job.enabled) {
            let planned = self.planned_fire(job, now);
            let Some(planned) = planned else { continue };
            if planned > now {
                continue;
            }

            // The fire is due; consume it.
            self.planned.lock().unwrap().remove(&job.id);
            self.last_fires.lock().unwrap().insert(job.id.clone(), planned);

            if self.store.has_live_for_job(&job.id) {
                // Coalesce: a run of this job is still pending or running.
                self.store.record_event(
                    now,
                    "run_skipped",
                    None,
                    Some(&job.id),
                    "fire dropped: a previous run is still live".into(),
                );
                continue;
            }

            let run_id = self.store.create_run(
                &job.id,
                &job.name,
                RunOrigin::Scheduler,
                1,
                job.priority,
                &job.resource_group,
                planned,
                now,
                None,
            );
            self.queue.push(QueuedRun {
                run_id,
                origin: RunOrigin::Scheduler,
                attempt: 1,
                priority: job.priority,
                scheduled_for: planned,
                enqueued_at: now,
                window_origin_fire: None,
                skip_prelude: false,
                job: job.clone(),
            });
        }
    }

    /// Planned next fire for a job, computing and caching it on first use.
    fn planned_fire(&self, job: &Job, now: DateTime<Local>) -> Option<DateTime<Local>> {
        if let Some(planned) = self.planned.lock().unwrap().get(&job.id) {
            return Some(*planned);
        }
        let last = self.last_fires.lock().unwrap().get(&job.id).copied();
        let next = {
            let mut rng = self.rng.lock().unwrap();
            trigger::next_fire(&job.trigger, now, last, &mut *rng)
        };
        match next {
            Ok(Some(next)) => {
                self.planned.lock().unwrap().insert(job.id.clone(), next);
                Some(next)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(job = %job.id, error = %e, "trigger evaluation failed");
                None
            }
        }
    }

    fn admit_runs(&self) {
        let now = self.clock.now();
        loop {
            match self.mode() {
                SchedulerMode::Single => {
                    // The single slot must be completely free.
                    if self.store.running_count() > 0 {
                        return;
                    }
                    let Some(run) = self.queue.pop_best_admissible(|queued| {
                        queued.scheduled_for <= now
                            && self.groups.try_acquire(&queued.job.resource_group, queued.run_id)
                    }) else {
                        return;
                    };
                    self.start_run(run, now);
                    return;
                }
                SchedulerMode::Auto => {
                    let Some(run) = self.queue.pop_best_admissible(|queued| {
                        queued.scheduled_for <= now
                            && self.groups.try_acquire(&queued.job.resource_group, queued.run_id)
                    }) else {
                        return;
                    };
                    self.start_run(run, now);
                }
            }
        }
    }

    fn start_run(&self, queued: QueuedRun, now: DateTime<Local>) {
        self.store.mark_running(queued.run_id, now);
        if queued.origin == RunOrigin::Scheduler {
            self.retry.on_window_opened(&queued.job.id);
        }
        self.store.record_event(
            now,
            "run_started",
            Some(queued.run_id),
            Some(&queued.job.id),
            format!("{:?} attempt {}", queued.origin, queued.attempt),
        );
        info!(
            run_id = queued.run_id,
            job = %queued.job.id,
            origin = ?queued.origin,
            "run started"
        );
        if queued.job.notify.on_start {
            let _ = self.notify_tx.send(NotifyEvent::RunStarted {
                job_id: queued.job.id.clone(),
                job_name: queued.job.name.clone(),
                run_id: queued.run_id,
            });
        }
        self.supervisor.launch(LaunchSpec {
            run_id: queued.run_id,
            job: queued.job,
            skip_prelude: queued.skip_prelude,
        });
    }

    // ------------------------------------------------------------------
    // Catalog surface
    // ------------------------------------------------------------------

    pub fn catalog_snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().unwrap().clone()
    }

    /// Validate and atomically publish a new catalog version. In-flight
    /// runs keep their old job snapshots.
    pub fn publish_catalog(&self, mut catalog: Catalog) -> Result<()> {
        catalog.ensure_default_group();
        catalog.validate()?;
        for job in &catalog.jobs {
            trigger::validate(&job.trigger)?;
        }
        catalog.version = self.catalog_snapshot().version + 1;
        self.groups.reload(&catalog.groups);
        let version = catalog.version;
        *self.catalog.write().unwrap() = Arc::new(catalog);
        self.planned.lock().unwrap().clear();
        self.wake.notify_one();
        info!(version, "catalog published");
        Ok(())
    }

    pub fn create_job(&self, job: Job) -> Result<()> {
        let mut catalog = (*self.catalog_snapshot()).clone();
        if catalog.job(&job.id).is_some() {
            return Err(ForgeError::Config(format!("job {:?} already exists", job.id)));
        }
        catalog.jobs.push(job);
        self.publish_catalog(catalog)
    }

    pub fn update_job(&self, id: &str, job: Job) -> Result<()> {
        if job.id != id {
            return Err(ForgeError::Config(format!(
                "job id {:?} does not match path {id:?}",
                job.id
            )));
        }
        let mut catalog = (*self.catalog_snapshot()).clone();
        let slot = catalog
            .jobs
            .iter_mut()
            .find(|existing| existing.id == id)
            .ok_or_else(|| ForgeError::UnknownJob(id.into()))?;
        *slot = job;
        self.publish_catalog(catalog)
    }

    pub fn delete_job(&self, id: &str) -> Result<()> {
        let mut catalog = (*self.catalog_snapshot()).clone();
        let before = catalog.jobs.len();
        catalog.jobs.retain(|job| job.id != id);
        if catalog.jobs.len() == before {
            return Err(ForgeError::UnknownJob(id.into()));
        }
        self.publish_catalog(catalog)?;
        self.planned.lock().unwrap().remove(id);
        self.last_fires.lock().unwrap().remove(id);
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let catalog = self.catalog_snapshot();
        let now = self.clock.now();
        catalog
            .jobs
            .iter()
            .map(|job| JobSummary {
                id: job.id.clone(),
                name: job.name.clone(),
                enabled: job.enabled,
                priority: job.priority,
                resource_group: job.resource_group.clone(),
                trigger: job.trigger.kind(),
                status: self.job_status(job),
                next_run: if job.enabled {
                    self.planned_fire(job, now)
                } else {
                    None
                },
            })
            .collect()
    }

    pub fn job_detail(&self, id: &str) -> Result<JobDetail> {
        let catalog = self.catalog_snapshot();
        let job = catalog
            .job(id)
            .ok_or_else(|| ForgeError::UnknownJob(id.into()))?;
        let now = self.clock.now();
        Ok(JobDetail {
            status: self.job_status(job),
            next_run: if job.enabled {
                self.planned_fire(job, now)
            } else {
                None
            },
            history: self.store.job_history(id, self.cfg.history_per_job),
            job: job.clone(),
        })
    }

    fn job_status(&self, job: &Job) -> &'static str {
        if !job.enabled {
            return "disabled";
        }
        match self.store.live_status_for_job(&job.id) {
            Some(RunStatus::Running) => "running",
            Some(_) => "pending",
            None => "idle",
        }
    }

    // ------------------------------------------------------------------
    // Scheduler control
    // ------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> SchedulerMode {
        *self.mode.lock().unwrap()
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = self.clock.now();
        self.store
            .record_event(now, "scheduler_started", None, None, String::new());
        let _ = self.notify_tx.send(NotifyEvent::SchedulerStarted);
        info!("scheduler started");
        self.wake.notify_one();
    }

    /// Stop tick planning, cancel every pending run, and signal every
    /// running run, waiting up to the grace period for them to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let now = self.clock.now();

        for queued in self.queue.drain() {
            self.store.finish(
                queued.run_id,
                RunStatus::Cancelled,
                FinishReason::NeverStarted,
                None,
                now,
            );
            self.store.record_event(
                now,
                "run_cancelled",
                Some(queued.run_id),
                Some(&queued.job.id),
                "scheduler stopping".into(),
            );
        }
        self.planned.lock().unwrap().clear();

        for run_id in self.supervisor.running() {
            self.supervisor.cancel(run_id);
        }

        let deadline = Instant::now() + Duration::from_secs(self.cfg.kill_grace_seconds + 1);
        while self.store.running_count() > 0 && Instant::now() < deadline {
            self.reap_finished();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.reap_finished();

        self.store
            .record_event(now, "scheduler_stopped", None, None, String::new());
        let _ = self.notify_tx.send(NotifyEvent::SchedulerStopped);
        info!("scheduler stopped");
    }

    /// AUTO→SINGLE leaves the running run alone but preempts everything
    /// still queued; SINGLE→AUTO resumes normal planning.
    pub fn set_mode(&self, new_mode: SchedulerMode) {
        {
            let mut mode = self.mode.lock().unwrap();
            if *mode == new_mode {
                return;
            }
            *mode = new_mode;
        }
        let now = self.clock.now();
        if new_mode == SchedulerMode::Single {
            for queued in self.queue.drain() {
                self.store.finish(
                    queued.run_id,
                    RunStatus::Preempted,
                    FinishReason::NeverStarted,
                    None,
                    now,
                );
                self.store.record_event(
                    now,
                    "run_preempted",
                    Some(queued.run_id),
                    Some(&queued.job.id),
                    "switched to single-task mode".into(),
                );
            }
        }
        info!(mode = new_mode.as_str(), "scheduler mode changed");
        self.store
            .record_event(now, "mode_changed", None, None, new_mode.as_str().into());
        let _ = self.notify_tx.send(NotifyEvent::ModeChanged {
            mode: new_mode.as_str().into(),
        });
        self.wake.notify_one();
    }

    // ------------------------------------------------------------------
    // Run surface
    // ------------------------------------------------------------------

    /// Create a manual run. Refused while the scheduler is running in
    /// auto mode; otherwise the run is boosted to the highest priority
    /// and admitted under the usual group rules.
    pub fn manual_run(&self, job_id: &str) -> Result<RunId> {
        let catalog = self.catalog_snapshot();
        let job = catalog
            .job(job_id)
            .ok_or_else(|| ForgeError::UnknownJob(job_id.into()))?
            .clone();

        if self.is_running() && self.mode() == SchedulerMode::Auto {
            return Err(ForgeError::SchedulerBusy);
        }

        let now = self.clock.now();
        let run_id = self.store.create_run(
            &job.id,
            &job.name,
            RunOrigin::Manual,
            1,
            PRIORITY_MIN,
            &job.resource_group,
            now,
            now,
            None,
        );
        self.store.record_event(
            now,
            "run_scheduled",
            Some(run_id),
            Some(&job.id),
            "manual".into(),
        );
        self.queue.push(QueuedRun {
            run_id,
            origin: RunOrigin::Manual,
            attempt: 1,
            priority: PRIORITY_MIN,
            scheduled_for: now,
            enqueued_at: now,
            window_origin_fire: None,
            skip_prelude: false,
            job,
        });
        // Try to start immediately instead of waiting out the tick.
        self.admit_runs();
        self.wake.notify_one();
        Ok(run_id)
    }

    /// Cancel a run. Idempotent: cancelling a terminal run is a no-op.
    pub fn cancel_run(&self, run_id: RunId) -> Result<()> {
        let run = self
            .store
            .get(run_id)
            .ok_or(ForgeError::UnknownRun(run_id))?;
        match run.status {
            RunStatus::Pending => {
                if self.queue.remove(run_id).is_some() {
                    let now = self.clock.now();
                    self.store.finish(
                        run_id,
                        RunStatus::Cancelled,
                        FinishReason::NeverStarted,
                        None,
                        now,
                    );
                    self.store.record_event(
                        now,
                        "run_cancelled",
                        Some(run_id),
                        Some(&run.job_id),
                        "cancelled while pending".into(),
                    );
                }
                Ok(())
            }
            RunStatus::Running => {
                self.supervisor.cancel(run_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Cancel the most recent live run of a job.
    pub fn cancel_latest(&self, job_id: &str) -> Result<RunId> {
        let catalog = self.catalog_snapshot();
        if catalog.job(job_id).is_none() {
            return Err(ForgeError::UnknownJob(job_id.into()));
        }
        let run_id = self
            .store
            .latest_live_for_job(job_id)
            .ok_or_else(|| ForgeError::Config(format!("job {job_id:?} has no live run")))?;
        self.cancel_run(run_id)?;
        Ok(run_id)
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            mode: self.mode(),
            total_jobs: self.catalog_snapshot().jobs.len(),
            running_runs: self.store.running_count(),
            queue_depth: self.queue.len(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        self.groups.summaries()
    }

    pub fn run_logs(&self, job_id: &str, run_id: Option<RunId>, limit: usize) -> Result<Vec<String>> {
        if self.catalog_snapshot().job(job_id).is_none() {
            return Err(ForgeError::UnknownJob(job_id.into()));
        }
        Ok(self.store.run_lines(job_id, run_id, limit))
    }

    pub fn global_logs(&self, limit: usize) -> Vec<String> {
        self.store.global_log_tail(limit)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<EngineEvent> {
        self.store.events_tail(limit)
    }

    pub fn live_runs(&self) -> Vec<Run> {
        self.store.live_snapshot()
    }

    pub fn get_run(&self, run_id: RunId) -> Option<Run> {
        self.store.get(run_id)
    }

    /// Dispatch a synthetic notification through the real delivery path.
    pub fn test_notification(&self, title: String, message: String) {
        let _ = self.notify_tx.send(NotifyEvent::Test { title, message });
    }
}
