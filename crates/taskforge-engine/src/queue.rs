//! Priority queue of pending runs awaiting admission.
//!
//! Ordering key: `(priority, scheduled_for, enqueued_at, job_id)` — lower
//! priority value first, then the earliest fire.

use std::sync::Mutex;

use chrono::{DateTime, Local};

use taskforge_core::catalog::Job;

use crate::run::{RunId, RunOrigin};

/// One queue entry. Carries the job snapshot taken at enqueue time so an
/// in-flight run keeps its original definition across catalog swaps.
#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub run_id: RunId,
    pub job: Job,
    pub origin: RunOrigin,
    pub attempt: u32,
    /// Effective priority; manual runs are boosted past the catalog range.
    pub priority: i32,
    pub scheduled_for: DateTime<Local>,
    pub enqueued_at: DateTime<Local>,
    pub window_origin_fire: Option<DateTime<Local>>,
    pub skip_prelude: bool,
}

impl QueuedRun {
    fn key(&self) -> (i32, DateTime<Local>, DateTime<Local>, &str) {
        (
            self.priority,
            self.scheduled_for,
            self.enqueued_at,
            self.job.id.as_str(),
        )
    }
}

#[derive(Default)]
pub struct RunQueue {
    entries: Mutex<Vec<QueuedRun>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, run: QueuedRun) {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.partition_point(|existing| existing.key() <= run.key());
        entries.insert(index, run);
    }

    /// Scan in order and remove the first entry the admission function
    /// accepts, leaving the rest in place.
    pub fn pop_best_admissible<F>(&self, mut admit: F) -> Option<QueuedRun>
    where
        F: FnMut(&QueuedRun) -> bool,
    {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.iter().position(|run| admit(run))?;
        Some(entries.remove(index))
    }

    pub fn remove(&self, run_id: RunId) -> Option<QueuedRun> {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.iter().position(|run| run.run_id == run_id)?;
        Some(entries.remove(index))
    }

    /// Take everything out, in order. Used by stop and by the
    /// AUTO→SINGLE preemption.
    pub fn drain(&self) -> Vec<QueuedRun> {
        let mut entries = self.entries.lock().unwrap();
        std::mem::take(&mut *entries)
    }

    pub fn snapshot(&self) -> Vec<QueuedRun> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_job(&self, job_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|run| run.job.id == job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use taskforge_core::catalog::{NotifyFlags, RetryPolicy, TriggerSpec};

    fn job(id: &str) -> Job {
        Job {
            id: id.into(),
            name: id.into(),
            enabled: true,
            priority: 0,
            resource_group: "default".into(),
            trigger: TriggerSpec::Interval { every: "1m".into() },
            command: vec!["true".into()],
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

    fn entry(run_id: RunId, job_id: &str, priority: i32, offset_secs: i64) -> QueuedRun {
        let base = Local.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        QueuedRun {
            run_id,
            job: job(job_id),
            origin: RunOrigin::Scheduler,
            attempt: 1,
            priority,
            scheduled_for: base + chrono::Duration::seconds(offset_secs),
            enqueued_at: base,
            window_origin_fire: None,
            skip_prelude: false,
        }
    }

    #[test]
    fn pops_in_priority_then_time_then_id_order() {
        let queue = RunQueue::new();
        queue.push(entry(1, "b", 5, 0));
        queue.push(entry(2, "a", 0, 10));
        queue.push(entry(3, "c", 0, 0));
        queue.push(entry(4, "a", 0, 0));

        let order: Vec<RunId> = std::iter::from_fn(|| queue.pop_best_admissible(|_| true))
            .map(|run| run.run_id)
            .collect();
        // priority 0 first; among those the earliest fire, with job id
        // breaking the tie; priority 5 last.
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[test]
    fn admission_skips_but_preserves_entries() {
        let queue = RunQueue::new();
        queue.push(entry(1, "a", 0, 0));
        queue.push(entry(2, "b", 5, 0));

        // Group of "a" is full; "b" should be admitted, "a" stays.
        let popped = queue.pop_best_admissible(|run| run.job.id != "a").unwrap();
        assert_eq!(popped.run_id, 2);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains_job("a"));
    }

    #[test]
    fn remove_by_run_id() {
        let queue = RunQueue::new();
        queue.push(entry(1, "a", 0, 0));
        queue.push(entry(2, "b", 0, 0));
        assert!(queue.remove(1).is_some());
        assert!(queue.remove(1).is_none());
        assert_eq!(queue.len(), 1);
    }
}
