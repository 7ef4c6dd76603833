/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pod resource model: resource names, quantities, and the pod/container
//! views consumed by classification, placement and scoring.
//!
//! The pod structures here are deliberately a thin slice of the
//! orchestrator's full object model: only the fields this subsystem reads
//! (identity, lifecycle markers, per-container requests and limits, and the
//! container statuses needed to resolve runtime ids).
//!
//! # Quantities
//! [`Quantity`] stores an amount in integer milli-units, which is exact for
//! every format this subsystem accepts (`"2"`, `"500m"`, `"1.5"`, `"1Gi"`,
//! `"2k"`).  Equality on the milli value is therefore equality on the
//! canonical form, which is what QoS classification requires.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use thiserror::Error;

// ── Resource names ────────────────────────────────────────────────────────────

/// Conventional CPU resource, in cores (requests may be fractional).
pub const RESOURCE_CPU: &str = "cpu";
/// Conventional memory resource, in bytes.
pub const RESOURCE_MEMORY: &str = "memory";
/// Real-time scheduling period, in microseconds.
pub const RESOURCE_RT_PERIOD: &str = "cpu-rt-period";
/// Real-time runtime budget per period, in microseconds.
pub const RESOURCE_RT_RUNTIME: &str = "cpu-rt-runtime";
/// Number of CPUs a real-time container must be spread over.
pub const RESOURCE_RT_CPU: &str = "cpu-rt-cpu";

// ── Quantity ──────────────────────────────────────────────────────────────────

/// A quantity string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity '{text}'")]
pub struct ParseQuantityError {
    text: String,
}

/// A non-negative resource amount, stored in milli-units.
///
/// `value()` rounds up to whole units, matching the convention that a
/// fractional CPU cannot be allocated exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { millis: 0 };

    /// A whole number of units.
    pub fn from_value(value: i64) -> Self {
        Quantity {
            millis: value.saturating_mul(1_000),
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        Quantity { millis }
    }

    /// Whole units, rounded up.
    pub fn value(&self) -> i64 {
        // ceil(millis / 1000) for the non-negative quantities we store
        (self.millis + 999).div_euclid(1_000)
    }

    pub fn milli_value(&self) -> i64 {
        self.millis
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    pub fn is_positive(&self) -> bool {
        self.millis > 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_add(other.millis),
        }
    }
}

impl fmt::Display for Quantity {
    /// Canonical form: whole units where exact, otherwise the milli form
    /// (`1500m`).  Magnitude suffixes are not reproduced on output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1_000 == 0 {
            write!(f, "{}", self.millis / 1_000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || ParseQuantityError {
            text: s.to_string(),
        };
        if text.is_empty() {
            return Err(invalid());
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, suffix) = text.split_at(split);

        // millis per one unit of the suffix
        let millis_per_unit: f64 = match suffix {
            "" => 1e3,
            "m" => 1.0,
            "k" => 1e6,
            "M" => 1e9,
            "G" => 1e12,
            "T" => 1e15,
            "Ki" => 1024.0 * 1e3,
            "Mi" => 1024.0 * 1024.0 * 1e3,
            "Gi" => 1024.0 * 1024.0 * 1024.0 * 1e3,
            "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1e3,
            _ => return Err(invalid()),
        };

        let number: f64 = number.parse().map_err(|_| invalid())?;
        let millis = number * millis_per_unit;
        if !millis.is_finite() || millis < 0.0 || millis > i64::MAX as f64 {
            return Err(invalid());
        }
        Ok(Quantity {
            millis: millis.round() as i64,
        })
    }
}

// ── Resource lists ────────────────────────────────────────────────────────────

/// Mapping of resource name to amount, as it appears in requests and limits.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Requests and limits of a single container.
#[derive(Debug, Clone, Default)]
pub struct ResourceRequirements {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

impl ResourceRequirements {
    /// The requested amount for `name`, zero when absent.
    pub fn request(&self, name: &str) -> Quantity {
        self.requests.get(name).copied().unwrap_or(Quantity::ZERO)
    }
}

// ── Pod model ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Container {
    pub name: String,
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default)]
pub struct PodSpec {
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
}

impl PodSpec {
    /// Init containers followed by regular containers, the order every
    /// whole-pod walk uses.
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.init_containers.iter().chain(self.containers.iter())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pod {
    /// Opaque unique id assigned by the orchestrator.
    pub uid: String,
    pub name: String,
    /// Set once the pod has been asked to terminate.
    pub deletion_timestamp: Option<SystemTime>,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Runtime-reported status of a single container.
///
/// `container_id` carries the runtime's `<scheme>://<id>` URL, empty while
/// the container has not been created yet.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    pub name: String,
    pub container_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PodStatus {
    pub phase: PodPhase,
    pub init_container_statuses: Vec<ContainerStatus>,
    pub container_statuses: Vec<ContainerStatus>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
