/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pod QoS classification.
//!
//! The service class decides how aggressively the node may reclaim
//! resources from a pod:
//!
//! * **Guaranteed** – requests and limits fully specified and equal; never
//!   reclaimed first.
//! * **Burstable** – some requests, incomplete or unequal limits.
//! * **BestEffort** – no requests or limits at all.
//!
//! Real-time containers extend the classic rule: a container whose limits
//! carry a positive real-time runtime counts as fully limited even without
//! a cpu+memory pair, because the real-time bandwidth cap is the stronger
//! guarantee.

use std::collections::BTreeSet;

use crate::resources::{
    Pod, Quantity, ResourceList, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_RT_CPU,
    RESOURCE_RT_PERIOD, RESOURCE_RT_RUNTIME,
};

// ── QoS classes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

/// Resource names that participate in classification; everything else in a
/// pod spec is ignored here.
const SUPPORTED_QOS_RESOURCES: [&str; 5] = [
    RESOURCE_CPU,
    RESOURCE_MEMORY,
    RESOURCE_RT_RUNTIME,
    RESOURCE_RT_PERIOD,
    RESOURCE_RT_CPU,
];

fn is_supported_qos_resource(name: &str) -> bool {
    SUPPORTED_QOS_RESOURCES.contains(&name)
}

/// Merge the positive, supported entries of `list` into `aggregate`.
fn accumulate(aggregate: &mut ResourceList, list: &ResourceList) {
    for (name, &quantity) in list {
        if !is_supported_qos_resource(name) || !quantity.is_positive() {
            continue;
        }
        let entry = aggregate.entry(name.clone()).or_insert(Quantity::ZERO);
        *entry = entry.saturating_add(quantity);
    }
}

/// Compute the QoS class of a pod from its init and regular containers.
pub fn pod_qos(pod: &Pod) -> QosClass {
    let mut requests = ResourceList::new();
    let mut limits = ResourceList::new();
    let mut is_guaranteed = true;

    for container in pod.spec.all_containers() {
        accumulate(&mut requests, &container.resources.requests);
        accumulate(&mut limits, &container.resources.limits);

        // a container counts as fully limited with either the classic
        // cpu+memory pair or a real-time runtime cap
        let limits_found: BTreeSet<&str> = container
            .resources
            .limits
            .iter()
            .filter(|(name, quantity)| {
                is_supported_qos_resource(name) && quantity.is_positive()
            })
            .map(|(name, _)| name.as_str())
            .collect();
        if !(limits_found.contains(RESOURCE_CPU) && limits_found.contains(RESOURCE_MEMORY))
            && !limits_found.contains(RESOURCE_RT_RUNTIME)
        {
            is_guaranteed = false;
        }
    }

    if requests.is_empty() && limits.is_empty() {
        return QosClass::BestEffort;
    }

    // requests must match limits key for key with equal quantities
    if is_guaranteed {
        for (name, request) in &requests {
            match limits.get(name) {
                Some(limit) if limit == request => {}
                _ => {
                    is_guaranteed = false;
                    break;
                }
            }
        }
    }

    if is_guaranteed && requests.len() == limits.len() {
        QosClass::Guaranteed
    } else {
        QosClass::Burstable
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
