// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor heartbeat and inventory registry.
//!
//! Each `LeaseRequest` is a heartbeat carrying the executor's node inventory
//! and the runs it currently holds. The registry is the only shared state
//! outside the JobDb and has its own lock.

use fm_core::RunId;
use fm_wire::{LeaseRequest, NodeInfo};
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

/// Latest known state of one executor.
#[derive(Debug, Clone)]
pub struct ExecutorRecord {
    pub executor_id: SmolStr,
    pub pool: SmolStr,
    pub last_seen_ms: u64,
    pub nodes: Vec<NodeInfo>,
    /// Every run the executor reported holding: placed on nodes or unassigned.
    pub reported_runs: HashSet<RunId>,
}

/// Summary of one scheduling pass as it affected one executor. A bounded
/// history is retained per executor for operator inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingContext {
    pub at_ms: u64,
    pub leased: u32,
    pub preempted: u32,
    pub failed: u32,
}

struct ExecutorEntry {
    record: ExecutorRecord,
    contexts: VecDeque<SchedulingContext>,
}

pub struct ExecutorRegistry {
    inner: Mutex<HashMap<SmolStr, ExecutorEntry>>,
    max_contexts: usize,
}

impl ExecutorRegistry {
    pub fn new(max_contexts: usize) -> Self {
        Self { inner: Mutex::new(HashMap::new()), max_contexts }
    }

    /// Record a heartbeat: refresh last-seen and replace the inventory.
    pub fn heartbeat(&self, request: &LeaseRequest, now_ms: u64) {
        let mut reported: HashSet<RunId> = request.unassigned_job_run_ids.iter().copied().collect();
        for node in &request.nodes {
            reported.extend(node.run_ids.iter().copied());
        }
        let record = ExecutorRecord {
            executor_id: request.executor_id.clone(),
            pool: request.pool.clone(),
            last_seen_ms: now_ms,
            nodes: request.nodes.clone(),
            reported_runs: reported,
        };
        let mut inner = self.inner.lock();
        match inner.entry(request.executor_id.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().record = record,
            Entry::Vacant(entry) => {
                entry.insert(ExecutorEntry { record, contexts: VecDeque::new() });
            }
        }
    }

    pub fn get(&self, executor_id: &str) -> Option<ExecutorRecord> {
        self.inner.lock().get(executor_id).map(|e| e.record.clone())
    }

    /// All known executors, unordered.
    pub fn executors(&self) -> Vec<ExecutorRecord> {
        self.inner.lock().values().map(|e| e.record.clone()).collect()
    }

    /// Executors whose last heartbeat is older than `timeout_ms`.
    pub fn expired(&self, now_ms: u64, timeout_ms: u64) -> Vec<SmolStr> {
        self.inner
            .lock()
            .values()
            .filter(|e| now_ms.saturating_sub(e.record.last_seen_ms) > timeout_ms)
            .map(|e| e.record.executor_id.clone())
            .collect()
    }

    /// Append a scheduling-context summary, keeping the newest `max_contexts`.
    pub fn record_context(&self, executor_id: &str, context: SchedulingContext) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(executor_id) else {
            return;
        };
        entry.contexts.push_back(context);
        while entry.contexts.len() > self.max_contexts {
            entry.contexts.pop_front();
        }
    }

    pub fn contexts(&self, executor_id: &str) -> Vec<SchedulingContext> {
        self.inner
            .lock()
            .get(executor_id)
            .map(|e| e.contexts.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "executors_tests.rs"]
mod tests;
