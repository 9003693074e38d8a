// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable job repository's delta-feed contract.
//!
//! The repository is a relational store owned elsewhere in the system; the
//! scheduler only ever consumes its append-only, serial-ordered change feeds.
//! Rows are full snapshots of the persisted job/run state, so reprocessing a
//! row is idempotent under the store's monotone-flag rules.

use async_trait::async_trait;
use fm_core::{JobId, RunId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// One versioned snapshot of a job's persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    /// Monotone per-feed sequence number; drives incremental reconciliation.
    pub serial: u64,
    pub job_id: JobId,
    pub queue: String,
    pub jobset: String,
    pub priority: u32,
    pub submitted_ms: u64,
    #[serde(default)]
    pub queue_ttl_secs: Option<u64>,
    pub queued: bool,
    pub queued_version: u32,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub cancel_by_jobset_requested: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub failed: bool,
    /// Serialized scheduling requirements; unmarshalled by the reconciler.
    pub scheduling_info: serde_json::Value,
    pub scheduling_info_version: u32,
}

/// One versioned snapshot of a run's persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub serial: u64,
    pub run_id: RunId,
    pub job_id: JobId,
    pub created_ms: u64,
    pub executor: String,
    pub node: String,
    pub scheduled_at_priority: i32,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub preempted: bool,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub returned: bool,
    #[serde(default)]
    pub run_attempted: bool,
}

/// Serial-ordered change feeds plus terminal-error lookups.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Rows with `serial` strictly greater than the given cursors,
    /// ascending by serial.
    async fn fetch_job_updates(
        &self,
        job_serial: u64,
        run_serial: u64,
    ) -> Result<(Vec<JobRow>, Vec<RunRow>), RepositoryError>;

    /// Terminal error payloads for the given runs, where present.
    async fn fetch_job_run_errors(
        &self,
        run_ids: &[RunId],
    ) -> Result<HashMap<RunId, String>, RepositoryError>;

    /// The subset of `run_ids` the repository no longer considers active.
    /// Used by the executor-api path to filter stale in-flight reports.
    async fn find_inactive_runs(&self, run_ids: &[RunId]) -> Result<Vec<RunId>, RepositoryError>;
}

#[derive(Default)]
struct InMemoryState {
    jobs: Vec<JobRow>,
    runs: Vec<RunRow>,
    run_errors: HashMap<RunId, String>,
    inactive: HashSet<RunId>,
    next_serial: u64,
    fail_fetches: u32,
}

/// Repository backend holding rows in memory. Standalone deployments and
/// tests feed it directly; serials are assigned on push.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<InMemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job row, assigning the next serial. Returns the serial.
    pub fn push_job(&self, mut row: JobRow) -> u64 {
        let mut state = self.state.lock();
        state.next_serial += 1;
        row.serial = state.next_serial;
        state.jobs.push(row);
        state.next_serial
    }

    /// Append a run row, assigning the next serial. Returns the serial.
    pub fn push_run(&self, mut row: RunRow) -> u64 {
        let mut state = self.state.lock();
        state.next_serial += 1;
        row.serial = state.next_serial;
        state.runs.push(row);
        state.next_serial
    }

    pub fn set_run_error(&self, run_id: RunId, message: impl Into<String>) {
        self.state.lock().run_errors.insert(run_id, message.into());
    }

    pub fn mark_inactive(&self, run_id: RunId) {
        self.state.lock().inactive.insert(run_id);
    }

    /// Make the next `n` fetches fail, exercising cycle rollback.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state.lock().fail_fetches = n;
    }
}

#[async_trait]
impl JobRepository for InMemoryRepository {
    async fn fetch_job_updates(
        &self,
        job_serial: u64,
        run_serial: u64,
    ) -> Result<(Vec<JobRow>, Vec<RunRow>), RepositoryError> {
        let mut state = self.state.lock();
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(RepositoryError::Unavailable("injected fetch failure".to_string()));
        }
        let jobs = state
            .jobs
            .iter()
            .filter(|row| row.serial > job_serial)
            .cloned()
            .collect();
        let runs = state
            .runs
            .iter()
            .filter(|row| row.serial > run_serial)
            .cloned()
            .collect();
        Ok((jobs, runs))
    }

    async fn fetch_job_run_errors(
        &self,
        run_ids: &[RunId],
    ) -> Result<HashMap<RunId, String>, RepositoryError> {
        let state = self.state.lock();
        Ok(run_ids
            .iter()
            .filter_map(|id| state.run_errors.get(id).map(|msg| (*id, msg.clone())))
            .collect())
    }

    async fn find_inactive_runs(&self, run_ids: &[RunId]) -> Result<Vec<RunId>, RepositoryError> {
        let state = self.state.lock();
        Ok(run_ids.iter().filter(|id| state.inactive.contains(id)).copied().collect())
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
