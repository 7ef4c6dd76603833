/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Container lifecycle hooks.
//!
//! [`InternalContainerLifecycle`] bridges the node agent's container
//! create/stop events to the CPU manager and, for real-time containers,
//! writes the per-cgroup bandwidth attributes the kernel enforces:
//!
//! ```text
//! <cpu mount>/<pod cgroup>/cpu.rt_period_us
//! <cpu mount>/<pod cgroup>/cpu.rt_multi_runtime_us      "<cpuset> <runtime>"
//! <cpu mount>/<pod cgroup>/<container>/cpu.rt_period_us
//! <cpu mount>/<pod cgroup>/<container>/cpu.rt_multi_runtime_us
//! ```
//!
//! Whether the CPU manager and the topology manager participate is decided
//! by explicit construction flags, injected by whoever assembles the node
//! agent.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::cpuset::CpuSet;
use crate::error::CpuManagerError;
use crate::manager::CpuManager;
use crate::resources::{Container, Pod, RESOURCE_RT_PERIOD, RESOURCE_RT_RUNTIME};

const CPU_RT_PERIOD_FILE: &str = "cpu.rt_period_us";
const CPU_RT_MULTI_RUNTIME_FILE: &str = "cpu.rt_multi_runtime_us";

/// The kernel rejects a runtime of exactly zero; 2µs is the accepted
/// minimum.
const MIN_RT_RUNTIME_US: i64 = 2;

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Where a pod's cgroups live.
pub trait PodCgroupProvider: Send + Sync {
    /// Mount point of the cpu cgroup controller, absent when the subsystem
    /// is not mounted.
    fn cpu_subsystem_mount(&self) -> Option<PathBuf>;

    /// Pod cgroup path relative to a controller mount.
    fn pod_cgroup_path(&self, pod: &Pod) -> PathBuf;
}

/// NUMA alignment collaborator.
pub trait TopologyManager: Send + Sync {
    fn add_container(&self, pod: &Pod, container_id: &str) -> anyhow::Result<()>;
    fn remove_container(&self, container_id: &str) -> anyhow::Result<()>;
}

// ── Cgroup file writers ───────────────────────────────────────────────────────

fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

fn cgroup_io_failed(path: &Path) -> impl FnOnce(io::Error) -> CpuManagerError + '_ {
    move |source| CpuManagerError::CgroupIoFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Write one ASCII integer attribute, creating missing parent directories.
fn write_rt_file(path: &Path, value: i64) -> Result<(), CpuManagerError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).map_err(cgroup_io_failed(path))?;
    }
    fs::write(path, value.to_string()).map_err(cgroup_io_failed(path))?;
    debug!(path = %path.display(), value, "cgroup attribute written");
    Ok(())
}

/// Write the `cpu.rt_multi_runtime_us` attribute: the cpuset in kernel list
/// form, a space, and the runtime in microseconds.  An empty set means the
/// container holds no CPUs and there is nothing to write.
fn write_rt_multi_runtime_file(
    cgroup_dir: &Path,
    cpus: &CpuSet,
    rt_runtime_us: i64,
) -> Result<(), CpuManagerError> {
    if cpus.is_empty() {
        return Ok(());
    }
    ensure_dir(cgroup_dir).map_err(cgroup_io_failed(cgroup_dir))?;

    let rt_runtime_us = if rt_runtime_us == 0 {
        MIN_RT_RUNTIME_US
    } else {
        rt_runtime_us
    };
    let path = cgroup_dir.join(CPU_RT_MULTI_RUNTIME_FILE);
    let content = format!("{cpus} {rt_runtime_us}");
    fs::write(&path, &content).map_err(cgroup_io_failed(&path))?;
    debug!(path = %path.display(), content = %content, "rt multi runtime written");
    Ok(())
}

// ── InternalContainerLifecycle ────────────────────────────────────────────────

pub struct InternalContainerLifecycle {
    cpu_manager: CpuManager,
    topology_manager: Option<Arc<dyn TopologyManager>>,
    cgroups: Arc<dyn PodCgroupProvider>,
    cpu_manager_enabled: bool,
    topology_manager_enabled: bool,
}

impl InternalContainerLifecycle {
    pub fn new(
        cpu_manager: CpuManager,
        topology_manager: Option<Arc<dyn TopologyManager>>,
        cgroups: Arc<dyn PodCgroupProvider>,
        cpu_manager_enabled: bool,
        topology_manager_enabled: bool,
    ) -> Self {
        Self {
            cpu_manager,
            topology_manager,
            cgroups,
            cpu_manager_enabled,
            topology_manager_enabled,
        }
    }

    fn topology_manager(&self) -> Option<&Arc<dyn TopologyManager>> {
        if self.topology_manager_enabled {
            self.topology_manager.as_ref()
        } else {
            None
        }
    }

    /// Called between container create and container start, so the CPU
    /// affinity and bandwidth settings are in place before the first
    /// process runs.
    pub fn pre_start(
        &self,
        pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<(), CpuManagerError> {
        if self.cpu_manager_enabled {
            self.cpu_manager.add_container(pod, container, container_id)?;
        }

        let assigned = self.cpu_manager.cpu_set(container_id);
        let rt_runtime = container.resources.request(RESOURCE_RT_RUNTIME);
        if let Some(cpus) = assigned {
            if !rt_runtime.is_zero() {
                self.write_rt_bandwidth(pod, container, container_id, &cpus)?;
            }
        }

        if let Some(topology_manager) = self.topology_manager() {
            topology_manager
                .add_container(pod, container_id)
                .map_err(|source| CpuManagerError::TopologyDiscoveryFailed { source })?;
        }
        Ok(())
    }

    /// Called when the node agent decides to stop a container.
    pub fn pre_stop(&self, container_id: &str) -> Result<(), CpuManagerError> {
        if self.cpu_manager_enabled {
            return self.cpu_manager.remove_container(container_id);
        }
        Ok(())
    }

    /// Called after a container has stopped.  Best-effort: failures are
    /// logged, never propagated, so teardown always completes.
    pub fn post_stop(&self, container_id: &str) -> Result<(), CpuManagerError> {
        if self.cpu_manager_enabled {
            if let Err(e) = self.cpu_manager.remove_container(container_id) {
                error!(container_id, error = %e, "cpu manager removal failed in PostStop");
            }
        }
        if let Some(topology_manager) = self.topology_manager() {
            if let Err(e) = topology_manager.remove_container(container_id) {
                error!(container_id, error = %e, "topology manager removal failed in PostStop");
            }
        }
        Ok(())
    }

    /// Write the four bandwidth attributes, pod level first so the
    /// container's budget never exceeds its parent's.
    fn write_rt_bandwidth(
        &self,
        pod: &Pod,
        container: &Container,
        container_id: &str,
        cpus: &CpuSet,
    ) -> Result<(), CpuManagerError> {
        let rt_period = container.resources.request(RESOURCE_RT_PERIOD).value();
        let rt_runtime = container.resources.request(RESOURCE_RT_RUNTIME).value();

        let mount = self.cgroups.cpu_subsystem_mount().ok_or_else(|| {
            CpuManagerError::CgroupIoFailed {
                path: PathBuf::from("cpu"),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    "cpu cgroup subsystem is not mounted",
                ),
            }
        })?;
        let pod_cgroup = mount.join(self.cgroups.pod_cgroup_path(pod));

        write_rt_file(&pod_cgroup.join(CPU_RT_PERIOD_FILE), rt_period)?;
        write_rt_multi_runtime_file(&pod_cgroup, cpus, rt_runtime)?;

        let container_cgroup = pod_cgroup.join(container_id);
        write_rt_file(&container_cgroup.join(CPU_RT_PERIOD_FILE), rt_period)?;
        write_rt_multi_runtime_file(&container_cgroup, cpus, rt_runtime)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
