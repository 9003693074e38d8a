// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned scheduling requirements attached to a job.
//!
//! Requirements use the Kubernetes vocabulary (`Toleration`, `Affinity`,
//! node selectors) via `k8s-openapi` so executor reports and scheduler
//! constraints speak the same types. The struct is immutable: updates derive
//! a new value with a bumped version.

use crate::resource::ResourceList;
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, Taint,
    Toleration,
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Annotation marking a job that must terminate after its first failed attempt.
pub const FAIL_FAST_ANNOTATION: &str = "foreman.io/fail-fast";

/// Scheduling requirements for a job, versioned monotonically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingInfo {
    /// Monotonic version; any newer version replaces the prior wholesale.
    pub version: u32,
    pub priority_class: SmolStr,
    /// Resource requests for the job's pod.
    #[serde(default)]
    pub resources: ResourceList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<SmolStr, SmolStr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<SmolStr, SmolStr>,
}

impl SchedulingInfo {
    pub fn fail_fast(&self) -> bool {
        self.annotations
            .get(FAIL_FAST_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// Derive a copy with a required anti-affinity for `node` under the
    /// cluster's node-id label, bumping the version.
    ///
    /// The `NotIn` requirement is merged into every selector term (terms are
    /// ORed, so each must exclude the node). Adding the same node twice is a
    /// no-op apart from the version bump.
    pub fn with_node_anti_affinity(&self, node_id_label: &str, node: &str) -> SchedulingInfo {
        let mut info = self.clone();
        info.version += 1;

        let affinity = info.affinity.get_or_insert_with(Affinity::default);
        let node_affinity = affinity.node_affinity.get_or_insert_with(NodeAffinity::default);
        let selector = node_affinity
            .required_during_scheduling_ignored_during_execution
            .get_or_insert_with(|| NodeSelector { node_selector_terms: vec![] });
        if selector.node_selector_terms.is_empty() {
            selector.node_selector_terms.push(NodeSelectorTerm::default());
        }

        for term in &mut selector.node_selector_terms {
            let expressions = term.match_expressions.get_or_insert_with(Vec::new);
            let idx = expressions
                .iter()
                .position(|r| r.key == node_id_label && r.operator == "NotIn")
                .unwrap_or_else(|| {
                    expressions.push(NodeSelectorRequirement {
                        key: node_id_label.to_string(),
                        operator: "NotIn".to_string(),
                        values: Some(vec![]),
                    });
                    expressions.len() - 1
                });
            let values = expressions[idx].values.get_or_insert_with(Vec::new);
            if !values.iter().any(|v| v == node) {
                values.push(node.to_string());
            }
        }

        info
    }

    /// True when a node with `labels` satisfies the plain node selector and
    /// any required node affinity.
    pub fn matches_node_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.node_selector {
            if labels.get(key.as_str()).map(String::as_str) != Some(value.as_str()) {
                return false;
            }
        }
        let Some(selector) = self
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
        else {
            return true;
        };
        node_selector_matches(labels, selector)
    }

    /// True when every scheduling-blocking taint on a node is tolerated.
    pub fn tolerates_taints(&self, taints: &[Taint]) -> bool {
        taints
            .iter()
            .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
            .all(|t| self.tolerations.iter().any(|tol| tolerates(tol, t)))
    }
}

/// Evaluate a `NodeSelector` against node labels: terms are ORed, the
/// expressions inside a term are ANDed.
pub fn node_selector_matches(labels: &BTreeMap<String, String>, selector: &NodeSelector) -> bool {
    if selector.node_selector_terms.is_empty() {
        return true;
    }
    selector.node_selector_terms.iter().any(|term| {
        term.match_expressions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .all(|req| requirement_matches(labels, req))
    })
}

fn requirement_matches(labels: &BTreeMap<String, String>, req: &NodeSelectorRequirement) -> bool {
    let actual = labels.get(&req.key);
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" => actual.is_some_and(|v| values.iter().any(|x| x == v)),
        "NotIn" => !actual.is_some_and(|v| values.iter().any(|x| x == v)),
        "Exists" => actual.is_some(),
        "DoesNotExist" => actual.is_none(),
        // Unknown operators fail closed: better to refuse a placement than
        // to violate a constraint we do not understand.
        _ => false,
    }
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    let key_matches = match toleration.key.as_deref() {
        None | Some("") => true,
        Some(key) => key == taint.key,
    };
    let value_matches = match toleration.operator.as_deref() {
        Some("Exists") => true,
        // Default operator is Equal.
        _ => toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or(""),
    };
    let effect_matches = match toleration.effect.as_deref() {
        None | Some("") => true,
        Some(effect) => effect == taint.effect,
    };
    key_matches && value_matches && effect_matches
}

#[cfg(test)]
#[path = "scheduling_tests.rs"]
mod tests;
