/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Real-time layer over the checkpointed assignments.
//!
//! [`RtState`] tracks two maps the placement algorithm needs beyond the
//! durable assignments: each container's utilisation share, and the derived
//! per-CPU accumulated utilisation.  The balance invariant ties them
//! together: for every CPU, the accumulated value equals the sum of the
//! shares of all containers assigned to it.
//!
//! Every mutation keeps both maps and the checkpoint in step inside one
//! `&mut self` call, so external observers never see a torn update.  The
//! derived map is never written to disk.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cpuset::CpuSet;
use crate::error::StateError;
use crate::state::CheckpointState;

// ── RtState ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RtState {
    checkpoint: CheckpointState,
    container_to_util: BTreeMap<String, f64>,
    cpu_to_util: BTreeMap<usize, f64>,
}

impl RtState {
    /// Wrap a checkpoint, zeroing the utilisation index over its default set.
    ///
    /// Utilisation shares are not persisted, so a freshly opened state has
    /// no per-container shares even if the checkpoint still carries
    /// assignments; the policy's `start` decides what to do with those.
    pub fn new(checkpoint: CheckpointState) -> Self {
        let cpu_to_util = checkpoint
            .default_cpu_set()
            .iter()
            .map(|cpu| (cpu, 0.0))
            .collect();
        RtState {
            checkpoint,
            container_to_util: BTreeMap::new(),
            cpu_to_util,
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// The container's real-time assignment, present only when both the CPU
    /// set and the utilisation share are recorded.
    pub fn rt_assignment(&self, container_id: &str) -> Option<(CpuSet, f64)> {
        let cpus = self.checkpoint.cpu_set(container_id)?;
        let util = self.container_to_util.get(container_id)?;
        Some((cpus, *util))
    }

    pub fn cpu_set(&self, container_id: &str) -> Option<CpuSet> {
        self.checkpoint.cpu_set(container_id)
    }

    pub fn cpu_set_or_default(&self, container_id: &str) -> CpuSet {
        self.checkpoint.cpu_set_or_default(container_id)
    }

    pub fn default_cpu_set(&self) -> CpuSet {
        self.checkpoint.default_cpu_set()
    }

    pub fn assignments(&self) -> BTreeMap<String, CpuSet> {
        self.checkpoint.assignments()
    }

    /// Defensive snapshot of the per-CPU accumulated utilisation.
    pub fn cpu_to_util(&self) -> BTreeMap<usize, f64> {
        self.cpu_to_util.clone()
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Record `container_id`'s assignment and utilisation share.
    ///
    /// A previous assignment for the same container is withdrawn first, so
    /// re-setting is balance-neutral.  The CPU set must lie inside the
    /// default set.
    pub fn set_rt_assignment(
        &mut self,
        container_id: &str,
        cpus: CpuSet,
        util: f64,
    ) -> Result<(), StateError> {
        let default = self.checkpoint.default_cpu_set();
        if !cpus.is_subset_of(&default) {
            return Err(StateError::InvalidAssignment {
                container_id: container_id.to_string(),
                cpus,
                default,
            });
        }

        if let Some(&old_util) = self.container_to_util.get(container_id) {
            let old_cpus =
                self.checkpoint
                    .cpu_set(container_id)
                    .ok_or_else(|| StateError::Corruption {
                        detail: format!(
                            "container '{container_id}' has a utilisation share but no cpu set"
                        ),
                    })?;
            for cpu in old_cpus.iter() {
                self.subtract_util(cpu, old_util);
            }
        }

        self.checkpoint.set_cpu_set(container_id, cpus.clone())?;
        self.container_to_util
            .insert(container_id.to_string(), util);
        for cpu in cpus.iter() {
            *self.cpu_to_util.entry(cpu).or_insert(0.0) += util;
        }
        debug!(container_id, cpus = %cpus, util, "rt assignment recorded");
        Ok(())
    }

    /// Withdraw a container's assignment.
    ///
    /// Unknown containers are a no-op.  A container tracked in the
    /// checkpoint without a utilisation share (placed by something other
    /// than the real-time path) loses only its checkpoint entry.
    pub fn delete(&mut self, container_id: &str) -> Result<(), StateError> {
        match (
            self.checkpoint.cpu_set(container_id),
            self.container_to_util.get(container_id).copied(),
        ) {
            (Some(cpus), Some(util)) => {
                for cpu in cpus.iter() {
                    self.subtract_util(cpu, util);
                }
                self.container_to_util.remove(container_id);
                self.checkpoint.delete(container_id)?;
                debug!(container_id, "rt assignment removed");
                Ok(())
            }
            (Some(_), None) => self.checkpoint.delete(container_id),
            (None, Some(_)) => Err(StateError::Corruption {
                detail: format!(
                    "container '{container_id}' has a utilisation share but no cpu set"
                ),
            }),
            (None, None) => Ok(()),
        }
    }

    /// Reset the default set.  The utilisation index is rebuilt to zero for
    /// exactly the CPUs of the new set; assignments are left alone.
    pub fn set_default_cpu_set(&mut self, cpus: CpuSet) -> Result<(), StateError> {
        self.checkpoint.set_default_cpu_set(cpus.clone())?;
        self.cpu_to_util = cpus.iter().map(|cpu| (cpu, 0.0)).collect();
        Ok(())
    }

    // ── Invariant ─────────────────────────────────────────────────────────────

    /// Check the balance invariant: per-CPU accumulated utilisation equals
    /// the sum of the assigned containers' shares, within float tolerance.
    pub fn verify_balance(&self) -> Result<(), StateError> {
        const TOLERANCE: f64 = 1e-9;

        let mut expected: BTreeMap<usize, f64> =
            self.cpu_to_util.keys().map(|&cpu| (cpu, 0.0)).collect();
        for (container_id, &util) in &self.container_to_util {
            let cpus = self
                .checkpoint
                .cpu_set(container_id)
                .ok_or_else(|| StateError::Corruption {
                    detail: format!(
                        "container '{container_id}' has a utilisation share but no cpu set"
                    ),
                })?;
            for cpu in cpus.iter() {
                *expected.entry(cpu).or_insert(0.0) += util;
            }
        }
        for (&cpu, &have) in &self.cpu_to_util {
            let want = expected.get(&cpu).copied().unwrap_or(0.0);
            if (have - want).abs() >= TOLERANCE {
                return Err(StateError::Corruption {
                    detail: format!(
                        "cpu {cpu} accumulated utilisation {have} disagrees with assignments ({want})"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Subtract with a floor at zero; floating-point drift must not turn a
    /// fully drained CPU negative.
    fn subtract_util(&mut self, cpu: usize, util: f64) {
        if let Some(value) = self.cpu_to_util.get_mut(&cpu) {
            *value = (*value - util).max(0.0);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CPU_MANAGER_STATE_FILE;
    use tempfile::TempDir;

    fn rt_state(dir: &TempDir, default: CpuSet) -> RtState {
        let mut checkpoint =
            CheckpointState::open(dir.path(), CPU_MANAGER_STATE_FILE, "real-time").unwrap();
        checkpoint.set_default_cpu_set(default).unwrap();
        RtState::new(checkpoint)
    }

    fn util_of(state: &RtState, cpu: usize) -> f64 {
        state.cpu_to_util().get(&cpu).copied().unwrap_or(f64::NAN)
    }

    #[test]
    fn fresh_state_has_zeroed_utilisation_index() {
        let dir = TempDir::new().unwrap();
        let state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));
        assert_eq!(state.cpu_to_util().len(), 4);
        assert_eq!(util_of(&state, 2), 0.0);
    }

    #[test]
    fn set_accumulates_on_every_assigned_cpu() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));

        state
            .set_rt_assignment("c1", CpuSet::from([0, 2]), 0.1)
            .unwrap();
        state
            .set_rt_assignment("c2", CpuSet::from([2]), 0.3)
            .unwrap();

        assert!((util_of(&state, 0) - 0.1).abs() < 1e-9);
        assert_eq!(util_of(&state, 1), 0.0);
        assert!((util_of(&state, 2) - 0.4).abs() < 1e-9);
        state.verify_balance().unwrap();
    }

    #[test]
    fn re_set_withdraws_the_old_assignment_first() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));

        state
            .set_rt_assignment("c1", CpuSet::from([0, 1]), 0.2)
            .unwrap();
        state
            .set_rt_assignment("c1", CpuSet::from([2, 3]), 0.5)
            .unwrap();

        assert_eq!(util_of(&state, 0), 0.0);
        assert_eq!(util_of(&state, 1), 0.0);
        assert!((util_of(&state, 2) - 0.5).abs() < 1e-9);
        assert_eq!(state.rt_assignment("c1").unwrap().0, CpuSet::from([2, 3]));
        state.verify_balance().unwrap();
    }

    #[test]
    fn set_outside_default_set_is_invalid_assignment() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1]));
        let err = state
            .set_rt_assignment("c1", CpuSet::from([1, 5]), 0.1)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidAssignment { .. }));
        // rejected sets leave no trace
        assert!(state.rt_assignment("c1").is_none());
        assert_eq!(util_of(&state, 1), 0.0);
    }

    #[test]
    fn delete_undoes_set_exactly() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));
        state
            .set_rt_assignment("keep", CpuSet::from([1]), 0.25)
            .unwrap();
        let before = state.cpu_to_util();

        state
            .set_rt_assignment("victim", CpuSet::from([1, 3]), 0.4)
            .unwrap();
        state.delete("victim").unwrap();

        assert_eq!(state.cpu_to_util(), before);
        assert!(state.rt_assignment("victim").is_none());
        state.verify_balance().unwrap();
    }

    #[test]
    fn delete_unknown_container_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0]));
        state.delete("ghost").unwrap();
        state.verify_balance().unwrap();
    }

    #[test]
    fn delete_clamps_at_zero() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1]));
        state
            .set_rt_assignment("c1", CpuSet::from([0]), 0.3)
            .unwrap();
        // resetting the pool zeroes the index; the delete below subtracts
        // 0.3 from an already-zero cpu and must clamp instead of going
        // negative
        state.set_default_cpu_set(CpuSet::from([0, 1])).unwrap();
        state.delete("c1").unwrap();
        assert_eq!(util_of(&state, 0), 0.0);
    }

    #[test]
    fn set_default_resets_index_but_not_assignments() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));
        state
            .set_rt_assignment("c1", CpuSet::from([3]), 0.7)
            .unwrap();

        state.set_default_cpu_set(CpuSet::from([0, 1])).unwrap();

        let index = state.cpu_to_util();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&0), Some(&0.0));
        assert!(!index.contains_key(&3), "cpu 3 left the pool");
        assert!(state.cpu_set("c1").is_some(), "assignment untouched");
    }

    #[test]
    fn non_rt_tracked_container_loses_only_the_checkpoint_entry() {
        let dir = TempDir::new().unwrap();
        let mut checkpoint =
            CheckpointState::open(dir.path(), CPU_MANAGER_STATE_FILE, "real-time").unwrap();
        checkpoint
            .set_default_cpu_set(CpuSet::from([0, 1]))
            .unwrap();
        checkpoint.set_cpu_set("plain", CpuSet::from([0])).unwrap();
        let mut state = RtState::new(checkpoint);

        state.delete("plain").unwrap();
        assert!(state.cpu_set("plain").is_none());
        state.verify_balance().unwrap();
    }

    #[test]
    fn balance_holds_over_a_mixed_sequence() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir, CpuSet::from([0, 1, 2, 3]));

        state
            .set_rt_assignment("a", CpuSet::from([0, 1]), 0.1)
            .unwrap();
        state
            .set_rt_assignment("b", CpuSet::from([1, 2]), 0.2)
            .unwrap();
        state
            .set_rt_assignment("a", CpuSet::from([2, 3]), 0.15)
            .unwrap();
        state.delete("b").unwrap();
        state
            .set_rt_assignment("c", CpuSet::from([0]), 0.05)
            .unwrap();
        state.delete("a").unwrap();

        state.verify_balance().unwrap();
        assert!((util_of(&state, 0) - 0.05).abs() < 1e-9);
        assert_eq!(util_of(&state, 2), 0.0);
    }
}
