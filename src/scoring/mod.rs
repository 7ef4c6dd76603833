/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Balanced resource allocation scoring.
//!
//! Ranks a node by how evenly its resources would be used after
//! hypothetically placing the pod: for every scored resource compute
//! `fraction = requested / allocatable`, then turn the spread of those
//! fractions into a score in `[0, 100]`, higher meaning better balanced.
//! A node where any single fraction reaches 1 is overbooked and scores 0.
//!
//! This scorer must not be used alone: it says nothing about *how much*
//! is free, only how evenly, and is meant to be combined with a
//! least-requested style priority.  The approach follows Wei Huang et al.,
//! "An Energy Efficient Virtual Machine Placement Algorithm with Balanced
//! Resource Utilization".
//!
//! Besides the configured resource weights, two optional fractions join:
//! the node's attached-volume count (when volume balancing is enabled) and
//! the pod's real-time utilisation demand (whenever it is non-zero).

use std::collections::BTreeMap;

use tracing::debug;

use crate::resources::{
    Pod, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_RT_CPU, RESOURCE_RT_PERIOD,
    RESOURCE_RT_RUNTIME,
};

/// Highest score a node can receive.
pub const MAX_NODE_SCORE: i64 = 100;

// ── Node snapshot ─────────────────────────────────────────────────────────────

/// Scheduler-side view of one node at scoring time.
///
/// `requested` already includes every scheduled pod; the pod being scored
/// is added on top by the scorer.  CPU values are in milli-cores, memory in
/// bytes, real-time utilisation in milli-units of CPU share.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    pub name: String,
    pub allocatable: BTreeMap<String, i64>,
    pub requested: BTreeMap<String, i64>,
    pub allocatable_volumes: usize,
    pub requested_volumes: usize,
    pub allocatable_rt_util_milli: i64,
    pub requested_rt_util_milli: i64,
}

// ── Scorer ────────────────────────────────────────────────────────────────────

/// Per-resource weights; presence in the map is what opts a resource into
/// scoring (the weights themselves are reserved for a future refinement).
pub type ResourceWeights = BTreeMap<String, i64>;

/// The default scored resources: cpu and memory, equally weighted.
pub fn default_resource_weights() -> ResourceWeights {
    ResourceWeights::from([
        (RESOURCE_CPU.to_string(), 1),
        (RESOURCE_MEMORY.to_string(), 1),
    ])
}

pub struct BalancedResourceScoring {
    resource_weights: ResourceWeights,
    /// Whether attached volumes contribute a fraction.  Injected at
    /// construction, not read from process-wide state.
    balance_volumes: bool,
}

impl BalancedResourceScoring {
    pub fn new(resource_weights: ResourceWeights, balance_volumes: bool) -> Self {
        Self {
            resource_weights,
            balance_volumes,
        }
    }

    /// Score `node` for `pod`.  Always in `[0, MAX_NODE_SCORE]`.
    pub fn score(&self, pod: &Pod, node: &NodeSnapshot) -> i64 {
        let mut fractions: Vec<f64> = Vec::with_capacity(self.resource_weights.len() + 2);

        for resource in self.resource_weights.keys() {
            let allocatable = node.allocatable.get(resource).copied().unwrap_or(0);
            let requested = node.requested.get(resource).copied().unwrap_or(0)
                + pod_resource_request(pod, resource);
            fractions.push(fraction_of_capacity(requested, allocatable));
        }

        let requested_rt = node.requested_rt_util_milli + pod_rt_util_milli(pod);
        if requested_rt != 0 {
            fractions.push(fraction_of_capacity(
                requested_rt,
                node.allocatable_rt_util_milli,
            ));
        }

        if self.balance_volumes && node.allocatable_volumes > 0 {
            fractions
                .push(node.requested_volumes as f64 / node.allocatable_volumes as f64);
        }

        let score = score_fractions(&fractions);
        debug!(
            node = %node.name,
            pod = %pod.name,
            fractions = ?fractions,
            score,
            "balanced resource score"
        );
        score
    }
}

/// Collapse the per-resource fractions into the final score.
fn score_fractions(fractions: &[f64]) -> i64 {
    if fractions.iter().any(|&f| f >= 1.0) {
        // an overbooked resource disqualifies the node outright
        return 0;
    }
    match fractions.len() {
        0 => MAX_NODE_SCORE,
        2 => {
            let diff = (fractions[0] - fractions[1]).abs();
            ((1.0 - diff) * MAX_NODE_SCORE as f64).round() as i64
        }
        _ => ((1.0 - variance(fractions)) * MAX_NODE_SCORE as f64).round() as i64,
    }
}

/// `requested / capacity`, with zero demand always fitting and zero
/// capacity never fitting.
fn fraction_of_capacity(requested: i64, capacity: i64) -> f64 {
    if requested == 0 {
        return 0.0;
    }
    if capacity == 0 {
        return 1.0;
    }
    requested as f64 / capacity as f64
}

/// Population variance.
fn variance(terms: &[f64]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let n = terms.len() as f64;
    let mean: f64 = terms.iter().sum::<f64>() / n;
    terms.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / n
}

/// Total request of the pod's regular containers for `resource`, in the
/// unit the snapshot uses (milli-cores for cpu, whole units otherwise).
fn pod_resource_request(pod: &Pod, resource: &str) -> i64 {
    pod.spec
        .containers
        .iter()
        .map(|container| {
            let quantity = container.resources.request(resource);
            if resource == RESOURCE_CPU {
                quantity.milli_value()
            } else {
                quantity.value()
            }
        })
        .sum()
}

/// Real-time utilisation the pod demands, in milli-units: for each
/// container `1000 · runtime / period`, multiplied by the number of CPUs it
/// wants to be spread over.
fn pod_rt_util_milli(pod: &Pod) -> i64 {
    pod.spec
        .containers
        .iter()
        .map(|container| {
            let period = container.resources.request(RESOURCE_RT_PERIOD).value();
            let runtime = container.resources.request(RESOURCE_RT_RUNTIME).value();
            if period == 0 || runtime == 0 {
                return 0;
            }
            let cpus = container.resources.request(RESOURCE_RT_CPU).value().max(1);
            (1_000 * runtime / period) * cpus
        })
        .sum()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
