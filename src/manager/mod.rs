/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! CPU manager facade.
//!
//! [`CpuManager`] owns the policy and the real-time state, serialises every
//! policy call behind one mutex, and drives the periodic reconciliation
//! loop that converges the checkpointed assignments with the live container
//! inventory.
//!
//! # Locking
//!
//! One mutex guards the state and all policy invocations.  The container
//! runtime RPC may block arbitrarily, so it is always issued *outside* the
//! lock; holding the lock across it would serialise every admission behind
//! a single slow runtime call.  If the RPC fails after a successful
//! placement, the assignment is rolled back under the lock and the failure
//! surfaced.
//!
//! State reads hand out defensive copies taken under the lock; callers see
//! a recent committed snapshot, never a torn write.
//!
//! # Collaborators
//!
//! The external world arrives as four traits stored at [`CpuManager::start`]:
//! the active pod list, source readiness, the pod status provider and the
//! container runtime.  Tests substitute all four.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CpuManagerConfig;
use crate::cpuset::CpuSet;
use crate::error::CpuManagerError;
use crate::policy::{
    NonePolicy, Placement, Policy, RealTimePolicy, POLICY_NONE, POLICY_REAL_TIME,
};
use crate::resources::{Container, Pod, PodPhase, PodStatus};
use crate::state::{CheckpointState, RtState, CPU_MANAGER_STATE_FILE};
use crate::topology::{CpuTopology, TopologyHint};

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Lists the pods the node currently considers active.
pub trait ActivePodsProvider: Send + Sync {
    fn active_pods(&self) -> Vec<Pod>;
}

/// Readiness of the node's pod configuration sources.  Stale-state removal
/// must not run while the pod list may still be incomplete.
pub trait SourcesReady: Send + Sync {
    fn all_ready(&self) -> bool;
}

/// Resolves a pod uid to its last observed status.
pub trait PodStatusProvider: Send + Sync {
    fn pod_status(&self, pod_uid: &str) -> Option<PodStatus>;
}

/// The container runtime service; the one call this subsystem needs.
pub trait ContainerRuntime: Send + Sync {
    fn update_container_resources(
        &self,
        container_id: &str,
        cpus: &CpuSet,
    ) -> anyhow::Result<()>;
}

struct Collaborators {
    active_pods: Arc<dyn ActivePodsProvider>,
    sources_ready: Arc<dyn SourcesReady>,
    pod_status: Arc<dyn PodStatusProvider>,
    runtime: Arc<dyn ContainerRuntime>,
}

// ── Container id resolution ───────────────────────────────────────────────────

/// Find the runtime id of `name` in a pod status.
///
/// Statuses carry ids as `<scheme>://<id>`; only the bare id is returned.
/// `None` means the container is not running yet (or the status entry is
/// malformed) and the caller should skip it this tick.
pub(crate) fn find_container_id_by_name(status: &PodStatus, name: &str) -> Option<String> {
    status
        .init_container_statuses
        .iter()
        .chain(status.container_statuses.iter())
        .find(|s| s.name == name && !s.container_id.is_empty())
        .and_then(|s| {
            let (scheme, id) = s.container_id.split_once("://")?;
            (!scheme.is_empty() && !id.is_empty()).then(|| id.to_string())
        })
}

// ── CpuManager ────────────────────────────────────────────────────────────────

/// Outcome record of one container visited by the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledContainer {
    pub pod_name: String,
    pub container_name: String,
    pub container_id: String,
}

/// The node-local CPU manager.  Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct CpuManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for CpuManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuManager").finish_non_exhaustive()
    }
}

struct ManagerInner {
    policy: Box<dyn Policy>,
    reconcile_period: Duration,
    state: Mutex<RtState>,
    collaborators: OnceLock<Collaborators>,
    stopped: AtomicBool,
}

impl CpuManager {
    /// Build a manager from configuration and a discovered topology.
    pub fn new(
        config: &CpuManagerConfig,
        topology: CpuTopology,
    ) -> Result<Self, CpuManagerError> {
        let policy: Box<dyn Policy> = match config.policy.as_str() {
            POLICY_NONE => Box::new(NonePolicy),
            POLICY_REAL_TIME => {
                if topology.num_cpus() == 0 {
                    return Err(CpuManagerError::TopologyDiscoveryFailed {
                        source: anyhow::anyhow!("topology reports zero cpus"),
                    });
                }
                if config.rt_period_us == 0 {
                    return Err(CpuManagerError::InvalidConfiguration {
                        reason: "real-time policy needs a period greater than zero".into(),
                    });
                }
                if config.rt_runtime_us == 0 {
                    return Err(CpuManagerError::InvalidConfiguration {
                        reason: "real-time policy needs a runtime greater than zero".into(),
                    });
                }
                if config.rt_runtime_us > config.rt_period_us {
                    return Err(CpuManagerError::InvalidConfiguration {
                        reason: format!(
                            "real-time runtime {}us exceeds period {}us",
                            config.rt_runtime_us, config.rt_period_us
                        ),
                    });
                }
                let allocable_rt_util = config.rt_runtime_us as f64 / config.rt_period_us as f64;
                let placement: Placement = config.placement.parse()?;
                Box::new(RealTimePolicy::new(
                    topology,
                    config.num_reserved_cpus,
                    config.reserved_cpus.iter().copied().collect(),
                    allocable_rt_util,
                    placement,
                )?)
            }
            other => {
                return Err(CpuManagerError::InvalidConfiguration {
                    reason: format!("unknown policy '{other}' (valid: none, real-time)"),
                })
            }
        };

        let checkpoint =
            CheckpointState::open(&config.state_dir, CPU_MANAGER_STATE_FILE, policy.name())?;
        Ok(CpuManager {
            inner: Arc::new(ManagerInner {
                policy,
                reconcile_period: config.reconcile_period(),
                state: Mutex::new(RtState::new(checkpoint)),
                collaborators: OnceLock::new(),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Store the collaborators, start the policy, and (for managing
    /// policies) launch the reconciliation thread.
    pub fn start(
        &self,
        active_pods: Arc<dyn ActivePodsProvider>,
        sources_ready: Arc<dyn SourcesReady>,
        pod_status: Arc<dyn PodStatusProvider>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<(), CpuManagerError> {
        info!(
            policy = self.inner.policy.name(),
            reconcile_period_ms = self.inner.reconcile_period.as_millis() as u64,
            "starting cpu manager"
        );
        let stored = self.inner.collaborators.set(Collaborators {
            active_pods,
            sources_ready,
            pod_status,
            runtime,
        });
        if stored.is_err() {
            warn!("cpu manager started twice; keeping the original collaborators");
        }

        {
            let mut state = self.lock_state();
            self.inner.policy.start(&mut state)?;
        }

        if self.inner.policy.name() == POLICY_NONE {
            return Ok(());
        }
        let manager = self.clone();
        let spawned = thread::Builder::new()
            .name("cpu-manager-reconcile".into())
            .spawn(move || loop {
                thread::sleep(manager.inner.reconcile_period);
                if manager.inner.stopped.load(Ordering::Relaxed) {
                    break;
                }
                manager.reconcile_state();
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn reconciliation thread");
        }
        Ok(())
    }

    /// Ask the reconciliation thread to exit after its current tick.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Relaxed);
    }

    // ── Container lifecycle ───────────────────────────────────────────────────

    /// Admit a container and push its CPU set to the runtime.
    ///
    /// The placement happens under the lock; the runtime RPC does not.  A
    /// failed RPC rolls the placement back and surfaces
    /// [`CpuManagerError::RuntimeRpcFailed`].
    pub fn add_container(
        &self,
        pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<(), CpuManagerError> {
        let Some(collaborators) = self.inner.collaborators.get() else {
            return Err(CpuManagerError::InvalidConfiguration {
                reason: "cpu manager has not been started".into(),
            });
        };

        let cpus = {
            let mut state = self.lock_state();
            if let Err(e) =
                self.inner
                    .policy
                    .add_container(&mut state, pod, container, container_id)
            {
                error!(container_id, error = %e, "AddContainer failed");
                self.abort_on_corruption(&e);
                return Err(e);
            }
            state.cpu_set_or_default(container_id)
        };

        if cpus.is_empty() {
            debug!(container_id, "skipping runtime update, cpu set is empty");
            return Ok(());
        }

        match collaborators
            .runtime
            .update_container_resources(container_id, &cpus)
        {
            Ok(()) => Ok(()),
            Err(source) => {
                error!(container_id, error = %source, "runtime rejected cpu set, rolling back");
                let mut state = self.lock_state();
                if let Err(rollback) = self.inner.policy.remove_container(&mut state, container_id)
                {
                    error!(container_id, error = %rollback, "rollback failed");
                    self.abort_on_corruption(&rollback);
                }
                Err(CpuManagerError::RuntimeRpcFailed {
                    container_id: container_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Withdraw a container's assignment and stop reconciling it.
    pub fn remove_container(&self, container_id: &str) -> Result<(), CpuManagerError> {
        let mut state = self.lock_state();
        if let Err(e) = self.inner.policy.remove_container(&mut state, container_id) {
            error!(container_id, error = %e, "RemoveContainer failed");
            self.abort_on_corruption(&e);
            return Err(e);
        }
        Ok(())
    }

    // ── State reads (defensive copies) ────────────────────────────────────────

    pub fn cpu_set(&self, container_id: &str) -> Option<CpuSet> {
        self.lock_state().cpu_set(container_id)
    }

    pub fn cpu_set_or_default(&self, container_id: &str) -> CpuSet {
        self.lock_state().cpu_set_or_default(container_id)
    }

    pub fn default_cpu_set(&self) -> CpuSet {
        self.lock_state().default_cpu_set()
    }

    pub fn cpu_to_util(&self) -> BTreeMap<usize, f64> {
        self.lock_state().cpu_to_util()
    }

    pub fn assignments(&self) -> BTreeMap<String, CpuSet> {
        self.lock_state().assignments()
    }

    /// NUMA alignment hints; stale state is reaped first so freed CPUs count
    /// as available.
    pub fn topology_hints(
        &self,
        pod: &Pod,
        container: &Container,
    ) -> BTreeMap<String, Vec<TopologyHint>> {
        self.remove_stale_state();
        let state = self.lock_state();
        self.inner.policy.topology_hints(&state, pod, container)
    }

    // ── Reconciliation ────────────────────────────────────────────────────────

    /// Drop state for containers that no longer exist in any active pod.
    ///
    /// The sweep is deliberately conservative: it aborts outright whenever
    /// the observation might be incomplete (sources not ready, empty pod
    /// list, any pod without a status, any container without a resolvable
    /// id).  It runs periodically, so a skipped sweep just retries later.
    fn remove_stale_state(&self) {
        let Some(collaborators) = self.inner.collaborators.get() else {
            return;
        };
        if !collaborators.sources_ready.all_ready() {
            return;
        }

        // the lock also keeps AddContainer from racing new state in under us
        let mut state = self.lock_state();

        let active_pods = collaborators.active_pods.active_pods();
        if active_pods.is_empty() {
            return;
        }

        let mut live: HashSet<String> = HashSet::new();
        for pod in &active_pods {
            let Some(status) = collaborators.pod_status.pod_status(&pod.uid) else {
                return;
            };
            for container in pod.spec.all_containers() {
                let Some(container_id) = find_container_id_by_name(&status, &container.name)
                else {
                    return;
                };
                live.insert(container_id);
            }
        }

        for container_id in state.assignments().keys() {
            if !live.contains(container_id) {
                warn!(container_id = %container_id, "removing stale container state");
                if let Err(e) = self.inner.policy.remove_container(&mut state, container_id) {
                    error!(container_id = %container_id, error = %e, "failed to remove stale container");
                    self.abort_on_corruption(&e);
                }
            }
        }
    }

    /// One reconciliation tick: reap stale state, then make sure every
    /// active container has an assignment and the runtime has its current
    /// CPU set.
    pub fn reconcile_state(&self) -> (Vec<ReconciledContainer>, Vec<ReconciledContainer>) {
        let mut success = Vec::new();
        let mut failure = Vec::new();

        self.remove_stale_state();

        let Some(collaborators) = self.inner.collaborators.get() else {
            return (success, failure);
        };

        for pod in collaborators.active_pods.active_pods() {
            let status = collaborators.pod_status.pod_status(&pod.uid);
            for container in pod.spec.all_containers() {
                let Some(status) = status.as_ref() else {
                    warn!(pod = %pod.name, "skipping pod, status not found");
                    failure.push(ReconciledContainer {
                        pod_name: pod.name.clone(),
                        container_name: container.name.clone(),
                        container_id: String::new(),
                    });
                    break;
                };

                let Some(container_id) = find_container_id_by_name(status, &container.name)
                else {
                    warn!(
                        pod = %pod.name,
                        container = %container.name,
                        "skipping container, id not found in status"
                    );
                    failure.push(ReconciledContainer {
                        pod_name: pod.name.clone(),
                        container_name: container.name.clone(),
                        container_id: String::new(),
                    });
                    continue;
                };

                // A missing entry has three possible causes: the policy does
                // not track this container, the process restarted with a
                // fresh state, or RemoveContainer already ran because the pod
                // is going away.  Only the running-and-not-deleted case is
                // re-added.
                if self.cpu_set(&container_id).is_none() {
                    if status.phase == PodPhase::Running && pod.deletion_timestamp.is_none() {
                        debug!(
                            pod = %pod.name,
                            container = %container.name,
                            container_id = %container_id,
                            "container not present in state, trying to add"
                        );
                        if let Err(e) = self.add_container(&pod, container, &container_id) {
                            error!(
                                pod = %pod.name,
                                container = %container.name,
                                container_id = %container_id,
                                error = %e,
                                "failed to add container"
                            );
                            failure.push(ReconciledContainer {
                                pod_name: pod.name.clone(),
                                container_name: container.name.clone(),
                                container_id,
                            });
                            continue;
                        }
                    } else {
                        continue;
                    }
                }

                let cpus = self.cpu_set_or_default(&container_id);
                if cpus.is_empty() {
                    debug!(
                        pod = %pod.name,
                        container = %container.name,
                        "skipping container, assigned cpu set is empty"
                    );
                    failure.push(ReconciledContainer {
                        pod_name: pod.name.clone(),
                        container_name: container.name.clone(),
                        container_id,
                    });
                    continue;
                }

                if let Err(e) = collaborators
                    .runtime
                    .update_container_resources(&container_id, &cpus)
                {
                    error!(
                        pod = %pod.name,
                        container = %container.name,
                        container_id = %container_id,
                        cpus = %cpus,
                        error = %e,
                        "failed to update container"
                    );
                    failure.push(ReconciledContainer {
                        pod_name: pod.name.clone(),
                        container_name: container.name.clone(),
                        container_id,
                    });
                    continue;
                }
                success.push(ReconciledContainer {
                    pod_name: pod.name.clone(),
                    container_name: container.name.clone(),
                    container_id,
                });
            }
        }
        (success, failure)
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, RtState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // a panic under the lock means the state may be half-written
                error!("cpu manager state mutex poisoned, aborting");
                drop(poisoned);
                std::process::abort();
            }
        }
    }

    /// State corruption cannot be recovered programmatically; force operator
    /// intervention instead of limping on with a broken invariant.
    fn abort_on_corruption(&self, err: &CpuManagerError) {
        if err.is_fatal() {
            error!(error = %err, "cpu state corrupted, aborting process");
            std::process::abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
