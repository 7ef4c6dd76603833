/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Durable container-to-CPU-set state.
//!
//! The checkpoint is a small YAML document rewritten atomically (temp file
//! + rename) after every mutation, so a restart always finds the last
//! committed mapping.  The document records which policy wrote it; a
//! mismatch on open is refused rather than silently reinterpreted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cpuset::CpuSet;
use crate::error::StateError;

/// File name of the checkpoint inside the state directory.
pub const CPU_MANAGER_STATE_FILE: &str = "cpu_manager_state";

// ── On-disk format ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDoc {
    policy_name: String,
    default_cpu_set: CpuSet,
    #[serde(default)]
    entries: BTreeMap<String, CpuSet>,
}

// ── CheckpointState ───────────────────────────────────────────────────────────

/// Persistent mapping `container id → CpuSet` plus the default CPU set.
#[derive(Debug)]
pub struct CheckpointState {
    path: PathBuf,
    policy_name: String,
    default_cpu_set: CpuSet,
    assignments: BTreeMap<String, CpuSet>,
}

impl CheckpointState {
    /// Open the checkpoint under `state_dir`, restoring a previous one if
    /// present or committing a fresh empty one otherwise.
    pub fn open(state_dir: &Path, file_name: &str, policy_name: &str) -> Result<Self, StateError> {
        fs::create_dir_all(state_dir).map_err(|source| StateError::CheckpointIo {
            path: state_dir.to_path_buf(),
            source,
        })?;
        let path = state_dir.join(file_name);

        let mut state = CheckpointState {
            path: path.clone(),
            policy_name: policy_name.to_string(),
            default_cpu_set: CpuSet::new(),
            assignments: BTreeMap::new(),
        };

        if path.exists() {
            state.restore()?;
            info!(
                path = %path.display(),
                containers = state.assignments.len(),
                default_cpu_set = %state.default_cpu_set,
                "restored cpu manager checkpoint"
            );
        } else {
            state.store()?;
            info!(path = %path.display(), "initialised empty cpu manager checkpoint");
        }
        Ok(state)
    }

    fn restore(&mut self) -> Result<(), StateError> {
        let content = fs::read_to_string(&self.path).map_err(|source| StateError::CheckpointIo {
            path: self.path.clone(),
            source,
        })?;
        let doc: CheckpointDoc =
            serde_yaml::from_str(&content).map_err(|e| StateError::CheckpointCorrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        if doc.policy_name != self.policy_name {
            return Err(StateError::PolicyMismatch {
                found: doc.policy_name,
                expected: self.policy_name.clone(),
            });
        }
        self.default_cpu_set = doc.default_cpu_set;
        self.assignments = doc.entries;
        Ok(())
    }

    /// Rewrite the whole document; rename makes the update atomic.
    fn store(&self) -> Result<(), StateError> {
        let io_err = |source| StateError::CheckpointIo {
            path: self.path.clone(),
            source,
        };

        let doc = CheckpointDoc {
            policy_name: self.policy_name.clone(),
            default_cpu_set: self.default_cpu_set.clone(),
            entries: self.assignments.clone(),
        };
        let content = serde_yaml::to_string(&doc).map_err(|e| StateError::CheckpointCorrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "checkpoint committed");
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn cpu_set(&self, container_id: &str) -> Option<CpuSet> {
        self.assignments.get(container_id).cloned()
    }

    /// The container's assignment, or the default set when it has none.
    pub fn cpu_set_or_default(&self, container_id: &str) -> CpuSet {
        self.cpu_set(container_id)
            .unwrap_or_else(|| self.default_cpu_set.clone())
    }

    pub fn default_cpu_set(&self) -> CpuSet {
        self.default_cpu_set.clone()
    }

    /// Defensive copy of the full assignment map.
    pub fn assignments(&self) -> BTreeMap<String, CpuSet> {
        self.assignments.clone()
    }

    // ── Writes (each commits the checkpoint) ──────────────────────────────────

    pub fn set_cpu_set(&mut self, container_id: &str, cpus: CpuSet) -> Result<(), StateError> {
        self.assignments.insert(container_id.to_string(), cpus);
        self.store()
    }

    pub fn set_default_cpu_set(&mut self, cpus: CpuSet) -> Result<(), StateError> {
        self.default_cpu_set = cpus;
        self.store()
    }

    /// Remove a container's assignment; unknown ids are a no-op.
    pub fn delete(&mut self, container_id: &str) -> Result<(), StateError> {
        if self.assignments.remove(container_id).is_some() {
            self.store()?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
