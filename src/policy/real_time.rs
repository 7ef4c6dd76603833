/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Real-time CPU admission and placement.
//!
//! A real-time container asks for `(period, runtime, cpuCount)`; its
//! utilisation share is `runtime / period`, and it must be spread over
//! `cpuCount` CPUs whose accumulated share can absorb it without crossing
//! the node-wide ceiling (`allocable_rt_util`, normally the kernel's
//! global `rt_runtime / rt_period` ratio).
//!
//! # Placement variants
//!
//! All three filter to CPUs where `util + share < allocable_rt_util` and
//! differ only in ordering:
//!
//! | Variant | Order | Effect |
//! |---|---|---|
//! | `worst-fit` (default) | largest residual headroom first | spreads load, keeps per-CPU slack |
//! | `best-fit` | smallest residual headroom first | packs tightly, frees whole CPUs |
//! | `first-fit` | ascending CPU id | cheapest, no sorting |
//!
//! Candidates are collected in ascending CPU id order and the sorts are
//! stable, so ties always break towards the lower CPU id and placement is
//! deterministic.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::cpuset::CpuSet;
use crate::error::CpuManagerError;
use crate::policy::{Policy, POLICY_REAL_TIME};
use crate::resources::{
    Container, Pod, RESOURCE_RT_CPU, RESOURCE_RT_PERIOD, RESOURCE_RT_RUNTIME,
};
use crate::state::RtState;
use crate::topology::CpuTopology;

// ── Placement variants ────────────────────────────────────────────────────────

/// Ordering strategy applied to the fitting CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    WorstFit,
    FirstFit,
    BestFit,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::WorstFit => "worst-fit",
            Placement::FirstFit => "first-fit",
            Placement::BestFit => "best-fit",
        }
    }
}

impl FromStr for Placement {
    type Err = CpuManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worst-fit" => Ok(Placement::WorstFit),
            "first-fit" => Ok(Placement::FirstFit),
            "best-fit" => Ok(Placement::BestFit),
            other => Err(CpuManagerError::InvalidConfiguration {
                reason: format!(
                    "unknown placement '{other}' (valid: worst-fit, first-fit, best-fit)"
                ),
            }),
        }
    }
}

// ── RealTimePolicy ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RealTimePolicy {
    topology: CpuTopology,
    /// Per-CPU utilisation ceiling, in `(0, 1]`.
    allocable_rt_util: f64,
    num_reserved_cpus: usize,
    /// CPUs reserved for system daemons; validated at construction.
    reserved_cpus: CpuSet,
    placement: Placement,
}

impl RealTimePolicy {
    pub fn new(
        topology: CpuTopology,
        num_reserved_cpus: usize,
        reserved_cpus: CpuSet,
        allocable_rt_util: f64,
        placement: Placement,
    ) -> Result<Self, CpuManagerError> {
        if !(allocable_rt_util > 0.0 && allocable_rt_util <= 1.0) {
            return Err(CpuManagerError::InvalidConfiguration {
                reason: format!(
                    "allocable real-time utilisation must be in (0, 1], got {allocable_rt_util}"
                ),
            });
        }

        let reserved = if reserved_cpus.size() > 0 {
            if !reserved_cpus.is_subset_of(&topology.cpus()) {
                return Err(CpuManagerError::InvalidConfiguration {
                    reason: format!(
                        "reserved cpus {reserved_cpus} are not part of the topology"
                    ),
                });
            }
            reserved_cpus
        } else {
            topology.reserve_lowest_n(num_reserved_cpus)?
        };
        if reserved.size() != num_reserved_cpus {
            return Err(CpuManagerError::InvalidConfiguration {
                reason: format!(
                    "unable to reserve the required amount of cpus (size of {reserved} is not {num_reserved_cpus})"
                ),
            });
        }

        Ok(RealTimePolicy {
            topology,
            allocable_rt_util,
            num_reserved_cpus,
            reserved_cpus: reserved,
            placement,
        })
    }

    /// Fitting CPUs with their residual headroom `allocable − util − share`,
    /// in ascending CPU id order.
    fn candidates(
        &self,
        cpu_to_util: &BTreeMap<usize, f64>,
        share: f64,
    ) -> Vec<(usize, f64)> {
        cpu_to_util
            .iter()
            .filter_map(|(&cpu, &util)| {
                let headroom = self.allocable_rt_util - util - share;
                (headroom > 0.0).then_some((cpu, headroom))
            })
            .collect()
    }

    /// Order `candidates` according to the configured placement variant.
    /// Stable sorts keep the ascending-id input order on equal headroom.
    fn order(&self, candidates: &mut [(usize, f64)]) {
        match self.placement {
            Placement::WorstFit => candidates.sort_by(|a, b| {
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
            Placement::BestFit => candidates.sort_by(|a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
            Placement::FirstFit => {}
        }
    }
}

/// Real-time resource requests of one container, `(period µs, runtime µs,
/// cpu count)`.  Absent resources read as zero.
fn rt_requests(container: &Container) -> (i64, i64, i64) {
    (
        container.resources.request(RESOURCE_RT_PERIOD).value(),
        container.resources.request(RESOURCE_RT_RUNTIME).value(),
        container.resources.request(RESOURCE_RT_CPU).value(),
    )
}

impl Policy for RealTimePolicy {
    fn name(&self) -> &'static str {
        POLICY_REAL_TIME
    }

    /// Reset the pool to the full topology and drop every checkpointed
    /// assignment.  Real-time placement is sensitive to the exact topology;
    /// assignments from a previous boot could violate the admission
    /// invariant on changed hardware, so they are intentionally discarded.
    fn start(&self, state: &mut RtState) -> Result<(), CpuManagerError> {
        info!(
            policy = self.name(),
            placement = self.placement.as_str(),
            allocable_rt_util = self.allocable_rt_util,
            reserved_cpus = %self.reserved_cpus,
            num_reserved_cpus = self.num_reserved_cpus,
            "starting real-time policy"
        );
        for container_id in state.assignments().keys() {
            warn!(
                container_id = %container_id,
                "discarding checkpointed assignment on policy start"
            );
            state.delete(container_id)?;
        }
        state.set_default_cpu_set(self.topology.cpus())?;
        Ok(())
    }

    fn add_container(
        &self,
        state: &mut RtState,
        _pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<(), CpuManagerError> {
        let (period, runtime, cpu_count) = rt_requests(container);
        if period == 0 || runtime == 0 {
            // not a real-time container
            return Ok(());
        }
        let share = runtime as f64 / period as f64;
        if share == 0.0 {
            return Ok(());
        }

        if state.rt_assignment(container_id).is_some() {
            info!(
                container = %container.name,
                container_id,
                "container already assigned to cpus, skipping"
            );
            return Ok(());
        }

        let snapshot = state.cpu_to_util();
        let mut candidates = self.candidates(&snapshot, share);
        if candidates.len() < cpu_count as usize {
            warn!(
                container_id,
                requested_cpus = cpu_count,
                fitting_cpus = candidates.len(),
                share,
                "unable to allocate cpus"
            );
            return Err(CpuManagerError::DoesNotFit {
                container_id: container_id.to_string(),
                requested_cpus: cpu_count as u64,
                fitting_cpus: candidates.len(),
            });
        }
        self.order(&mut candidates);

        let cpus: CpuSet = candidates
            .iter()
            .take(cpu_count as usize)
            .map(|&(cpu, _)| cpu)
            .collect();
        state.set_rt_assignment(container_id, cpus.clone(), share)?;
        info!(
            container = %container.name,
            container_id,
            cpus = %cpus,
            share,
            "real-time container placed"
        );
        Ok(())
    }

    fn remove_container(
        &self,
        state: &mut RtState,
        container_id: &str,
    ) -> Result<(), CpuManagerError> {
        if state.rt_assignment(container_id).is_none() {
            // not placed by this policy
            debug!(container_id, "no real-time assignment to remove");
            return Ok(());
        }
        info!(container_id, "removing real-time assignment");
        state.delete(container_id)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Quantity, ResourceRequirements};
    use crate::state::{CheckpointState, CPU_MANAGER_STATE_FILE};
    use tempfile::TempDir;

    fn rt_state(dir: &TempDir) -> RtState {
        let checkpoint =
            CheckpointState::open(dir.path(), CPU_MANAGER_STATE_FILE, POLICY_REAL_TIME).unwrap();
        RtState::new(checkpoint)
    }

    fn policy(placement: Placement, allocable: f64) -> RealTimePolicy {
        RealTimePolicy::new(
            CpuTopology::uniform(1, 4, 1),
            0,
            CpuSet::new(),
            allocable,
            placement,
        )
        .unwrap()
    }

    /// Container requesting `(period µs, runtime µs, cpu count)`.
    fn rt_container(period: i64, runtime: i64, cpus: i64) -> Container {
        let mut requests = crate::resources::ResourceList::new();
        requests.insert(RESOURCE_RT_PERIOD.into(), Quantity::from_value(period));
        requests.insert(RESOURCE_RT_RUNTIME.into(), Quantity::from_value(runtime));
        requests.insert(RESOURCE_RT_CPU.into(), Quantity::from_value(cpus));
        Container {
            name: "rt".into(),
            resources: ResourceRequirements {
                requests,
                ..Default::default()
            },
        }
    }

    /// Seed `{0: 0.1, 1: 0.3, 2: 0.0, 3: 0.5}` via filler assignments.
    fn seed_utilisation(state: &mut RtState) {
        state
            .set_rt_assignment("filler-0", CpuSet::from([0]), 0.1)
            .unwrap();
        state
            .set_rt_assignment("filler-1", CpuSet::from([1]), 0.3)
            .unwrap();
        state
            .set_rt_assignment("filler-3", CpuSet::from([3]), 0.5)
            .unwrap();
    }

    fn util_of(state: &RtState, cpu: usize) -> f64 {
        state.cpu_to_util()[&cpu]
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[test]
    fn allocable_util_must_be_a_positive_fraction() {
        for bad in [0.0, -0.1, 1.5] {
            let err = RealTimePolicy::new(
                CpuTopology::uniform(1, 4, 1),
                0,
                CpuSet::new(),
                bad,
                Placement::WorstFit,
            )
            .unwrap_err();
            assert!(matches!(err, CpuManagerError::InvalidConfiguration { .. }));
        }
    }

    #[test]
    fn explicit_reservation_must_match_the_requested_count() {
        let err = RealTimePolicy::new(
            CpuTopology::uniform(1, 4, 1),
            2,
            CpuSet::from([0]),
            0.95,
            Placement::WorstFit,
        )
        .unwrap_err();
        assert!(matches!(err, CpuManagerError::InvalidConfiguration { .. }));
    }

    #[test]
    fn reservation_defaults_to_lowest_cores() {
        let policy = RealTimePolicy::new(
            CpuTopology::uniform(1, 4, 2),
            2,
            CpuSet::new(),
            0.95,
            Placement::WorstFit,
        )
        .unwrap();
        assert_eq!(policy.reserved_cpus, CpuSet::from([0, 4]));
    }

    // ── Start ─────────────────────────────────────────────────────────────────

    #[test]
    fn start_resets_pool_and_discards_prior_assignments() {
        let dir = TempDir::new().unwrap();
        let mut state = rt_state(&dir);
        state.set_default_cpu_set(CpuSet::from([0, 1])).unwrap();
        state
            .set_rt_assignment("stale", CpuSet::from([1]), 0.4)
            .unwrap();

        policy(Placement::WorstFit, 0.95).start(&mut state).unwrap();

        assert_eq!(state.default_cpu_set(), CpuSet::from([0, 1, 2, 3]));
        assert!(state.assignments().is_empty());
        assert_eq!(util_of(&state, 1), 0.0);
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    #[test]
    fn worst_fit_picks_the_most_free_cpus() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);

        // share 0.1 over 2 cpus: headrooms are 2:0.85, 0:0.75, 1:0.55, 3:0.35
        let container = rt_container(1_000_000, 100_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-1")
            .unwrap();

        let (cpus, share) = state.rt_assignment("rt-1").unwrap();
        assert_eq!(cpus, CpuSet::from([0, 2]));
        assert!((share - 0.1).abs() < 1e-9);
        assert!((util_of(&state, 0) - 0.2).abs() < 1e-9);
        assert!((util_of(&state, 2) - 0.1).abs() < 1e-9);
        state.verify_balance().unwrap();
    }

    #[test]
    fn admission_succeeds_when_exactly_enough_cpus_fit() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);

        // share 0.5: cpus 2 (0.45), 0 (0.35) and 1 (0.15) fit, cpu 3 does not
        let container = rt_container(1_000_000, 500_000, 3);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-wide")
            .unwrap();

        let (cpus, _) = state.rt_assignment("rt-wide").unwrap();
        assert_eq!(cpus, CpuSet::from([0, 1, 2]));
    }

    #[test]
    fn admission_fails_without_mutating_state() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);
        let before = state.cpu_to_util();

        // share 0.7: only cpus 0 and 2 have headroom, three are needed
        let container = rt_container(1_000_000, 700_000, 3);
        let err = policy
            .add_container(&mut state, &Pod::default(), &container, "rt-big")
            .unwrap_err();

        match err {
            CpuManagerError::DoesNotFit {
                requested_cpus,
                fitting_cpus,
                ..
            } => {
                assert_eq!(requested_cpus, 3);
                assert_eq!(fitting_cpus, 2);
            }
            other => panic!("expected DoesNotFit, got {other}"),
        }
        assert_eq!(state.cpu_to_util(), before);
        assert!(state.rt_assignment("rt-big").is_none());
    }

    #[test]
    fn admission_never_crosses_the_ceiling() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);

        let container = rt_container(1_000_000, 400_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-cap")
            .unwrap();

        let (cpus, _) = state.rt_assignment("rt-cap").unwrap();
        for cpu in cpus.iter() {
            assert!(util_of(&state, cpu) < 0.95);
        }
    }

    #[test]
    fn re_add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();

        let container = rt_container(1_000_000, 100_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-1")
            .unwrap();
        let first = state.cpu_to_util();
        let assignment = state.rt_assignment("rt-1");

        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-1")
            .unwrap();
        assert_eq!(state.cpu_to_util(), first);
        assert_eq!(state.rt_assignment("rt-1"), assignment);
    }

    #[test]
    fn zero_period_or_runtime_is_not_real_time() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();

        for container in [
            rt_container(0, 100_000, 1),
            rt_container(1_000_000, 0, 1),
            Container::default(),
        ] {
            policy
                .add_container(&mut state, &Pod::default(), &container, "plain")
                .unwrap();
            assert!(state.rt_assignment("plain").is_none());
        }
    }

    // ── Placement variants ────────────────────────────────────────────────────

    #[test]
    fn first_fit_takes_ascending_cpu_ids() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::FirstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);

        let container = rt_container(1_000_000, 100_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-ff")
            .unwrap();
        let (cpus, _) = state.rt_assignment("rt-ff").unwrap();
        assert_eq!(cpus, CpuSet::from([0, 1]));
    }

    #[test]
    fn best_fit_takes_the_tightest_cpus() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::BestFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);

        // headrooms for share 0.1: 3:0.35, 1:0.55, 0:0.75, 2:0.85
        let container = rt_container(1_000_000, 100_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-bf")
            .unwrap();
        let (cpus, _) = state.rt_assignment("rt-bf").unwrap();
        assert_eq!(cpus, CpuSet::from([1, 3]));
    }

    #[test]
    fn ties_break_towards_the_lower_cpu_id() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        // all four cpus idle: equal headroom everywhere

        let container = rt_container(1_000_000, 100_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-tie")
            .unwrap();
        let (cpus, _) = state.rt_assignment("rt-tie").unwrap();
        assert_eq!(cpus, CpuSet::from([0, 1]));
    }

    // ── Removal ───────────────────────────────────────────────────────────────

    #[test]
    fn remove_restores_the_previous_utilisation() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        seed_utilisation(&mut state);
        let before = state.cpu_to_util();

        let container = rt_container(1_000_000, 200_000, 2);
        policy
            .add_container(&mut state, &Pod::default(), &container, "rt-tmp")
            .unwrap();
        policy.remove_container(&mut state, "rt-tmp").unwrap();

        assert_eq!(state.cpu_to_util(), before);
        state.verify_balance().unwrap();
    }

    #[test]
    fn remove_of_unassigned_container_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let policy = policy(Placement::WorstFit, 0.95);
        let mut state = rt_state(&dir);
        policy.start(&mut state).unwrap();
        policy.remove_container(&mut state, "ghost").unwrap();
    }

    #[test]
    fn placement_parses_from_config_strings() {
        assert_eq!("worst-fit".parse::<Placement>().unwrap(), Placement::WorstFit);
        assert_eq!("first-fit".parse::<Placement>().unwrap(), Placement::FirstFit);
        assert_eq!("best-fit".parse::<Placement>().unwrap(), Placement::BestFit);
        assert!("round-robin".parse::<Placement>().is_err());
    }
}
