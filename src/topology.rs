//! CPU inventory of the node.
//!
//! [`CpuTopology`] is consumed as a value; discovering it from the machine
//! is a collaborator's job.  The one non-trivial operation here is
//! [`CpuTopology::reserve_lowest_n`], which picks the CPUs the operator
//! reserves for system daemons from low-numbered cores first, so that on a
//! hyper-threaded box both siblings of core 0 go before anything on core 1.

use std::collections::{BTreeMap, BTreeSet};

use crate::cpuset::CpuSet;
use crate::error::CpuManagerError;

// ── Topology ──────────────────────────────────────────────────────────────────

/// Physical location of one logical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    pub socket_id: usize,
    pub core_id: usize,
}

/// Inventory of the node's logical CPUs.
#[derive(Debug, Clone, Default)]
pub struct CpuTopology {
    cpu_details: BTreeMap<usize, CpuInfo>,
}

impl CpuTopology {
    pub fn new(cpu_details: BTreeMap<usize, CpuInfo>) -> Self {
        Self { cpu_details }
    }

    /// Regular layout helper: `sockets × cores_per_socket × threads_per_core`
    /// with the kernel's usual numbering, where sibling threads of one core
    /// are `num_cores` apart (core 0 of an 8-CPU HT box owns CPUs 0 and 4).
    pub fn uniform(sockets: usize, cores_per_socket: usize, threads_per_core: usize) -> Self {
        let num_cores = sockets * cores_per_socket;
        let mut cpu_details = BTreeMap::new();
        for cpu in 0..num_cores * threads_per_core {
            let core_id = cpu % num_cores;
            cpu_details.insert(
                cpu,
                CpuInfo {
                    socket_id: core_id / cores_per_socket.max(1),
                    core_id,
                },
            );
        }
        Self { cpu_details }
    }

    pub fn num_cpus(&self) -> usize {
        self.cpu_details.len()
    }

    pub fn num_cores(&self) -> usize {
        self.cpu_details
            .values()
            .map(|info| info.core_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn num_sockets(&self) -> usize {
        self.cpu_details
            .values()
            .map(|info| info.socket_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// All logical CPU ids.
    pub fn cpus(&self) -> CpuSet {
        self.cpu_details.keys().copied().collect()
    }

    pub fn cpu_info(&self, cpu: usize) -> Option<&CpuInfo> {
        self.cpu_details.get(&cpu)
    }

    /// Select `n` CPUs for system reservation, preferring low-numbered cores.
    ///
    /// CPUs are ordered by `(core id, cpu id)` and the first `n` taken, so
    /// all sibling threads of a core are drained before the next core is
    /// touched.
    pub fn reserve_lowest_n(&self, n: usize) -> Result<CpuSet, CpuManagerError> {
        if n > self.num_cpus() {
            return Err(CpuManagerError::InvalidConfiguration {
                reason: format!(
                    "cannot reserve {n} cpus out of {} available",
                    self.num_cpus()
                ),
            });
        }
        let mut ordered: Vec<(usize, usize)> = self
            .cpu_details
            .iter()
            .map(|(&cpu, info)| (info.core_id, cpu))
            .collect();
        ordered.sort_unstable();
        Ok(ordered.into_iter().take(n).map(|(_, cpu)| cpu).collect())
    }
}

// ── Topology hints (stub) ─────────────────────────────────────────────────────

/// NUMA placement hint.  Alignment with other resource controllers happens
/// in an external collaborator; this subsystem only exposes the shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyHint {
    pub numa_nodes: Vec<usize>,
    pub preferred: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
