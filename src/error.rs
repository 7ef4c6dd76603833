/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the CPU management subsystem.
//!
//! Two error enums model the two failure layers:
//!
//! * [`StateError`] — low-level failures of the checkpointed state (invalid
//!   assignments, broken invariants, checkpoint I/O).
//! * [`CpuManagerError`] — everything a caller of the manager or the
//!   lifecycle hooks can observe.
//!
//! # Propagation policy
//!
//! | Variant | Handling |
//! |---|---|
//! | `DoesNotFit` | surfaced to the hook caller; the container must not start; no state was mutated |
//! | `CgroupIoFailed` | surfaced to the hook caller |
//! | `RuntimeRpcFailed` | assignment rolled back locally, then surfaced |
//! | `InvalidConfiguration`, `TopologyDiscoveryFailed` | construction-time, surfaced |
//! | `State(Corruption)` | fatal; the manager aborts the process |
//!
//! Reconciliation-loop errors are logged and the loop continues.
//!
//! Collaborator failures (runtime RPC, topology discovery) arrive as
//! `anyhow::Error` and are carried as sources; the core's own failures stay
//! fully structured.

use std::path::PathBuf;

use thiserror::Error;

use crate::cpuset::CpuSet;

// ── State layer ───────────────────────────────────────────────────────────────

/// Failures of the checkpointed CPU assignment state.
#[derive(Debug, Error)]
pub enum StateError {
    /// An assignment was requested outside the default CPU set.  This is a
    /// programming error in the calling policy, not an admission failure.
    #[error("assignment for container '{container_id}' is not a subset of the default cpu set (cpus: {cpus}, default: {default})")]
    InvalidAssignment {
        container_id: String,
        cpus: CpuSet,
        default: CpuSet,
    },

    /// The dual-level state disagrees with itself (for example a recorded
    /// utilisation with no matching CPU set).  Not recoverable
    /// programmatically; the manager treats this as fatal.
    #[error("cpu state corruption: {detail}")]
    Corruption { detail: String },

    /// Reading or writing the checkpoint file failed.
    #[error("checkpoint i/o failed for {path}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but cannot be understood.
    #[error("checkpoint {path} is corrupt: {detail}")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// The checkpoint was written by a different policy.  Switching policies
    /// requires draining the node and removing the state file.
    #[error("checkpoint was written by policy '{found}' but the active policy is '{expected}' - drain the node and remove the state file")]
    PolicyMismatch { found: String, expected: String },
}

// ── Manager layer ─────────────────────────────────────────────────────────────

/// Top-level error surface of the CPU manager and the lifecycle hooks.
#[derive(Debug, Error)]
pub enum CpuManagerError {
    /// The manager or a policy was constructed with unusable inputs.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The topology collaborator produced nothing this subsystem can place
    /// containers on.
    #[error("cpu topology discovery failed")]
    TopologyDiscoveryFailed {
        #[source]
        source: anyhow::Error,
    },

    /// Not enough CPUs with sufficient headroom for a real-time admission.
    /// Non-fatal; state is unchanged.
    #[error("container '{container_id}' does not fit: requested {requested_cpus} cpus, only {fitting_cpus} have headroom")]
    DoesNotFit {
        container_id: String,
        requested_cpus: u64,
        fitting_cpus: usize,
    },

    /// The container runtime refused the CPU set update.  The assignment has
    /// already been rolled back when this is returned.
    #[error("runtime rejected resource update for container '{container_id}'")]
    RuntimeRpcFailed {
        container_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A cgroup filesystem write failed.
    #[error("cgroup write failed for {path}")]
    CgroupIoFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl CpuManagerError {
    /// True for admission rejections that leave state untouched and simply
    /// mean the container cannot be placed right now.
    pub fn is_does_not_fit(&self) -> bool {
        matches!(self, CpuManagerError::DoesNotFit { .. })
    }

    /// True when the underlying state has broken its invariant and the
    /// process should abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CpuManagerError::State(StateError::Corruption { .. }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
