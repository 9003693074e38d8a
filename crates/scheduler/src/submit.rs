// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static feasibility: can this job still fit somewhere?
//!
//! Checked after lease-return anti-affinities or scheduling-info changes may
//! have made a job unschedulable. Fairness and priority are not considered,
//! only whether any known node could ever host the pod.

use crate::executors::ExecutorRecord;
use fm_core::SchedulingInfo;

/// Pure predicate over scheduling requirements and the current node inventory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitChecker;

impl SubmitChecker {
    pub fn new() -> Self {
        Self
    }

    /// `Ok` when at least one node can host the job; `Err` carries the reason.
    pub fn check(
        &self,
        info: &SchedulingInfo,
        executors: &[ExecutorRecord],
    ) -> Result<(), String> {
        if executors.iter().all(|e| e.nodes.is_empty()) {
            return Err("no nodes reported by any executor".to_string());
        }

        let mut resource_misses = 0usize;
        let mut taint_misses = 0usize;
        let mut selector_misses = 0usize;

        for executor in executors {
            for node in &executor.nodes {
                if !info.resources.fits_within(&node.allocatable) {
                    resource_misses += 1;
                    continue;
                }
                if !info.tolerates_taints(&node.taints) {
                    taint_misses += 1;
                    continue;
                }
                if !info.matches_node_labels(&node.labels) {
                    selector_misses += 1;
                    continue;
                }
                return Ok(());
            }
        }

        Err(format!(
            "no node fits: {} too small, {} tainted, {} excluded by selector or affinity",
            resource_misses, taint_misses, selector_misses
        ))
    }
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
