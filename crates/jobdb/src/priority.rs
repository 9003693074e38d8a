// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide priority-class table.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashMap;

/// A named priority class jobs schedule under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClass {
    /// Priority runs are scheduled at on the node.
    pub priority: i32,
    /// Whether runs in this class may be preempted by higher classes.
    #[serde(default = "default_preemptible")]
    pub preemptible: bool,
}

fn default_preemptible() -> bool {
    true
}

pub type PriorityClasses = HashMap<SmolStr, PriorityClass>;
