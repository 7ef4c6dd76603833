//! CPU manager configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! policy: real-time
//! placement: worst-fit
//! reconcile_period_ms: 10000
//! state_dir: /var/lib/cpu-manager
//! rt_period_us: 1000000
//! rt_runtime_us: 950000
//! num_reserved_cpus: 2
//! reserved_cpus: [0, 4]
//! ```
//!
//! Every field is optional; absent values fall back to their defaults, so a
//! partial (or empty) document is accepted gracefully.  Validation of the
//! combination (non-zero period/runtime for the real-time policy, a
//! satisfiable reservation) happens when the manager is constructed, not
//! here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_policy() -> String {
    "none".to_string()
}

fn default_placement() -> String {
    "worst-fit".to_string()
}

fn default_reconcile_period_ms() -> u64 {
    10_000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/cpu-manager")
}

// ── CpuManagerConfig ──────────────────────────────────────────────────────────

/// Node-local CPU manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CpuManagerConfig {
    /// Active policy: `"none"` or `"real-time"`.
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Placement variant for the real-time policy.
    #[serde(default = "default_placement")]
    pub placement: String,

    /// Milliseconds between reconciliation ticks.
    #[serde(default = "default_reconcile_period_ms")]
    pub reconcile_period_ms: u64,

    /// Directory holding the checkpoint file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Kernel global real-time period, microseconds.  Together with
    /// `rt_runtime_us` this yields the per-CPU utilisation ceiling.
    #[serde(default)]
    pub rt_period_us: u64,

    /// Kernel global real-time runtime, microseconds.
    #[serde(default)]
    pub rt_runtime_us: u64,

    /// Number of CPUs reserved for system daemons.
    #[serde(default)]
    pub num_reserved_cpus: usize,

    /// Explicit reservation; when empty the reservation is taken from
    /// low-numbered cores.
    #[serde(default)]
    pub reserved_cpus: Vec<usize>,
}

impl Default for CpuManagerConfig {
    fn default() -> Self {
        CpuManagerConfig {
            policy: default_policy(),
            placement: default_placement(),
            reconcile_period_ms: default_reconcile_period_ms(),
            state_dir: default_state_dir(),
            rt_period_us: 0,
            rt_runtime_us: 0,
            num_reserved_cpus: 0,
            reserved_cpus: Vec::new(),
        }
    }
}

impl CpuManagerConfig {
    /// Parse `path` into a configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("loading cpu manager configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open configuration file: {}", path.display()))?;

        let config: CpuManagerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML file: {}", path.display()))?;

        info!(
            policy = %config.policy,
            placement = %config.placement,
            reconcile_period_ms = config.reconcile_period_ms,
            state_dir = %config.state_dir.display(),
            "cpu manager configuration loaded"
        );
        Ok(config)
    }

    pub fn reconcile_period(&self) -> Duration {
        Duration::from_millis(self.reconcile_period_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
