//! Run record store — live runs, bounded terminal history per job, the
//! recent-event ring, and the global log tail.
//!
//! One lock guards the whole table; writers hold it only for the minimum
//! update and snapshot reads clone out.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::run::{FinishReason, Run, RunId, RunOrigin, RunStatus};

/// One entry of the global recent-event ring.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub at: DateTime<Local>,
    pub kind: String,
    pub run_id: Option<RunId>,
    pub job_id: Option<String>,
    pub message: String,
}

struct StoreInner {
    next_run_id: RunId,
    /// Pending and running runs.
    live: BTreeMap<RunId, Run>,
    /// Last K terminal runs per job, newest last.
    history: HashMap<String, VecDeque<Run>>,
    events: VecDeque<EngineEvent>,
    global_log: VecDeque<String>,
}

pub struct RunRecordStore {
    inner: Mutex<StoreInner>,
    history_per_job: usize,
    run_log_lines: usize,
    global_log_lines: usize,
    event_ring: usize,
}

impl RunRecordStore {
    pub fn new(history_per_job: usize, run_log_lines: usize, global_log_lines: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_run_id: 1,
                live: BTreeMap::new(),
                history: HashMap::new(),
                events: VecDeque::new(),
                global_log: VecDeque::new(),
            }),
            history_per_job,
            run_log_lines,
            global_log_lines,
            event_ring: 200,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_run(
        &self,
        job_id: &str,
        job_name: &str,
        origin: RunOrigin,
        attempt: u32,
        priority: i32,
        resource_group: &str,
        scheduled_for: DateTime<Local>,
        enqueued_at: DateTime<Local>,
        window_origin_fire: Option<DateTime<Local>>,
    ) -> RunId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_run_id;
        inner.next_run_id += 1;
        inner.live.insert(
            id,
            Run {
                id,
                job_id: job_id.into(),
                job_name: job_name.into(),
                origin,
                attempt,
                priority,
                resource_group: resource_group.into(),
                scheduled_for,
                enqueued_at,
                started_at: None,
                finished_at: None,
                exit_code: None,
                status: RunStatus::Pending,
                reason: None,
                keyword_hits: Vec::new(),
                window_origin_fire,
                last_lines: VecDeque::new(),
            },
        );
        id
    }

    pub fn mark_running(&self, run_id: RunId, at: DateTime<Local>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.live.get_mut(&run_id) {
            run.status = RunStatus::Running;
            run.started_at = Some(at);
        }
    }

    /// Move a live run to its terminal state and into the per-job history
    /// ring. Returns the finished record.
    pub fn finish(
        &self,
        run_id: RunId,
        status: RunStatus,
        reason: FinishReason,
        exit_code: Option<i32>,
        at: DateTime<Local>,
    ) -> Option<Run> {
        debug_assert!(status.is_terminal());
        let mut inner = self.inner.lock().unwrap();
        let mut run = inner.live.remove(&run_id)?;
        run.status = status;
        run.reason = Some(reason);
        run.exit_code = exit_code;
        run.finished_at = Some(at);

        let ring = inner.history.entry(run.job_id.clone()).or_default();
        if ring.len() >= self.history_per_job {
            ring.pop_front();
        }
        ring.push_back(run.clone());
        Some(run)
    }

    pub fn append_line(&self, run_id: RunId, line: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.live.get_mut(&run_id) {
            run.push_line(line.to_string(), self.run_log_lines);
        }
        push_ring(&mut inner.global_log, line.to_string(), self.global_log_lines);
    }

    pub fn record_keyword_hit(&self, run_id: RunId, line: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.live.get_mut(&run_id) {
            run.keyword_hits.push(line.to_string());
        }
    }

    pub fn push_global_line(&self, line: String) {
        let mut inner = self.inner.lock().unwrap();
        push_ring(&mut inner.global_log, line, self.global_log_lines);
    }

    pub fn global_log_tail(&self, limit: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        tail(&inner.global_log, limit)
    }

    pub fn record_event(
        &self,
        at: DateTime<Local>,
        kind: &str,
        run_id: Option<RunId>,
        job_id: Option<&str>,
        message: String,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let event = EngineEvent {
            at,
            kind: kind.into(),
            run_id,
            job_id: job_id.map(Into::into),
            message,
        };
        push_ring(&mut inner.events, event, self.event_ring);
    }

    pub fn events_tail(&self, limit: usize) -> Vec<EngineEvent> {
        let inner = self.inner.lock().unwrap();
        tail(&inner.events, limit)
    }

    pub fn get(&self, run_id: RunId) -> Option<Run> {
        let inner = self.inner.lock().unwrap();
        inner.live.get(&run_id).cloned().or_else(|| {
            inner
                .history
                .values()
                .flatten()
                .find(|run| run.id == run_id)
                .cloned()
        })
    }

    pub fn live_snapshot(&self) -> Vec<Run> {
        let inner = self.inner.lock().unwrap();
        inner.live.values().cloned().collect()
    }

    pub fn running_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .live
            .values()
            .filter(|run| run.status == RunStatus::Running)
            .count()
    }

    /// Does the job have a pending or running run? Drives coalescing.
    pub fn has_live_for_job(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.live.values().any(|run| run.job_id == job_id)
    }

    /// Live status for a job: `Running` wins over `Pending`.
    pub fn live_status_for_job(&self, job_id: &str) -> Option<RunStatus> {
        let inner = self.inner.lock().unwrap();
        let mut found = None;
        for run in inner.live.values() {
            if run.job_id == job_id {
                if run.status == RunStatus::Running {
                    return Some(RunStatus::Running);
                }
                found = Some(run.status);
            }
        }
        found
    }

    /// Most recent live run for a job (highest run id), for cancel-latest.
    pub fn latest_live_for_job(&self, job_id: &str) -> Option<RunId> {
        let inner = self.inner.lock().unwrap();
        inner
            .live
            .values()
            .rev()
            .find(|run| run.job_id == job_id)
            .map(|run| run.id)
    }

    /// Terminal history for a job, newest first.
    pub fn job_history(&self, job_id: &str, limit: usize) -> Vec<Run> {
        let inner = self.inner.lock().unwrap();
        let Some(ring) = inner.history.get(job_id) else {
            return Vec::new();
        };
        ring.iter().rev().take(limit).cloned().collect()
    }

    /// Output lines of a specific run, or of the job's most recent run.
    pub fn run_lines(&self, job_id: &str, run_id: Option<RunId>, limit: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let run = match run_id {
            Some(id) => inner.live.get(&id).or_else(|| {
                inner
                    .history
                    .get(job_id)
                    .and_then(|ring| ring.iter().rev().find(|run| run.id == id))
            }),
            None => inner
                .live
                .values()
                .rev()
                .find(|run| run.job_id == job_id)
                .or_else(|| inner.history.get(job_id).and_then(|ring| ring.back())),
        };
        match run {
            Some(run) => tail(&run.last_lines, limit),
            None => Vec::new(),
        }
    }
}

fn push_ring<T>(ring: &mut VecDeque<T>, item: T, cap: usize) {
    if ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(item);
}

fn tail<T: Clone>(ring: &VecDeque<T>, limit: usize) -> Vec<T> {
    let skip = ring.len().saturating_sub(limit);
    ring.iter().skip(skip).cloned().collect()
}
