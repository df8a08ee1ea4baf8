//! Resource group table — named concurrency pools.
//!
//! Admission decisions happen while holding the table lock, so
//! check-and-insert is atomic and `running ≤ max_concurrent` holds at all
//! times.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

use taskforge_core::catalog::ResourceGroupSpec;

use crate::run::RunId;

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub running: usize,
    pub max: usize,
    pub available: usize,
    pub run_ids: Vec<RunId>,
}

struct GroupState {
    max_concurrent: usize,
    running: HashSet<RunId>,
}

#[derive(Default)]
pub struct ResourceGroupTable {
    groups: Mutex<HashMap<String, GroupState>>,
}

impl ResourceGroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the group definitions from a freshly published catalog.
    /// Running ids carry over; a removed group stays until it drains so
    /// its releases still land somewhere.
    pub fn reload(&self, specs: &[ResourceGroupSpec]) {
        let mut groups = self.groups.lock().unwrap();
        let mut next: HashMap<String, GroupState> = specs
            .iter()
            .map(|spec| {
                let running = groups
                    .remove(&spec.name)
                    .map(|old| old.running)
                    .unwrap_or_default();
                (
                    spec.name.clone(),
                    GroupState {
                        max_concurrent: spec.max_concurrent,
                        running,
                    },
                )
            })
            .collect();
        for (name, state) in groups.drain() {
            if !state.running.is_empty() {
                next.entry(name).or_insert(state);
            }
        }
        *groups = next;
    }

    /// Atomically reserve a slot in `group` for `run_id`.
    pub fn try_acquire(&self, group: &str, run_id: RunId) -> bool {
        let mut groups = self.groups.lock().unwrap();
        match groups.get_mut(group) {
            Some(state) => {
                if state.running.len() < state.max_concurrent {
                    state.running.insert(run_id);
                    true
                } else {
                    false
                }
            }
            None => {
                warn!(group, run_id, "admission against unknown resource group");
                false
            }
        }
    }

    pub fn release(&self, group: &str, run_id: RunId) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(state) = groups.get_mut(group) {
            state.running.remove(&run_id);
        }
    }

    pub fn holds(&self, group: &str, run_id: RunId) -> bool {
        let groups = self.groups.lock().unwrap();
        groups
            .get(group)
            .map(|state| state.running.contains(&run_id))
            .unwrap_or(false)
    }

    pub fn total_running(&self) -> usize {
        let groups = self.groups.lock().unwrap();
        groups.values().map(|state| state.running.len()).sum()
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        let groups = self.groups.lock().unwrap();
        let mut out: Vec<GroupSummary> = groups
            .iter()
            .map(|(name, state)| {
                let mut run_ids: Vec<RunId> = state.running.iter().copied().collect();
                run_ids.sort_unstable();
                GroupSummary {
                    name: name.clone(),
                    running: state.running.len(),
                    max: state.max_concurrent,
                    available: state.max_concurrent.saturating_sub(state.running.len()),
                    run_ids,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
