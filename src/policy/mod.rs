//! CPU assignment policies.
//!
//! A [`Policy`] decides which CPUs a container gets; the manager owns the
//! state and serialises the calls.  Two policies exist:
//!
//! * [`NonePolicy`] – the default: no CPU management at all.
//! * [`RealTimePolicy`] – utilisation-based admission and placement for
//!   containers that request real-time bandwidth.

mod real_time;

pub use real_time::{Placement, RealTimePolicy};

use std::collections::BTreeMap;

use crate::error::CpuManagerError;
use crate::resources::{Container, Pod};
use crate::state::RtState;
use crate::topology::TopologyHint;

/// Name of the no-op policy.
pub const POLICY_NONE: &str = "none";
/// Name of the real-time policy.
pub const POLICY_REAL_TIME: &str = "real-time";

// ── Policy trait ──────────────────────────────────────────────────────────────

/// A CPU assignment policy.  All calls arrive under the manager's mutex.
pub trait Policy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once when the manager starts, before any container calls.
    fn start(&self, state: &mut RtState) -> Result<(), CpuManagerError>;

    /// Admit and place a container.  Non-fatal rejections
    /// ([`CpuManagerError::DoesNotFit`]) leave the state untouched.
    fn add_container(
        &self,
        state: &mut RtState,
        pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<(), CpuManagerError>;

    /// Withdraw a container's assignment; unknown containers are a no-op.
    fn remove_container(
        &self,
        state: &mut RtState,
        container_id: &str,
    ) -> Result<(), CpuManagerError>;

    /// NUMA alignment hints.  Placement here is NUMA-oblivious, so the
    /// default is the empty map.
    fn topology_hints(
        &self,
        _state: &RtState,
        _pod: &Pod,
        _container: &Container,
    ) -> BTreeMap<String, Vec<TopologyHint>> {
        BTreeMap::new()
    }
}

// ── NonePolicy ────────────────────────────────────────────────────────────────

/// Policy that manages nothing; every container keeps the node's default
/// CPU mask.
#[derive(Debug, Default)]
pub struct NonePolicy;

impl Policy for NonePolicy {
    fn name(&self) -> &'static str {
        POLICY_NONE
    }

    fn start(&self, _state: &mut RtState) -> Result<(), CpuManagerError> {
        Ok(())
    }

    fn add_container(
        &self,
        _state: &mut RtState,
        _pod: &Pod,
        _container: &Container,
        _container_id: &str,
    ) -> Result<(), CpuManagerError> {
        Ok(())
    }

    fn remove_container(
        &self,
        _state: &mut RtState,
        _container_id: &str,
    ) -> Result<(), CpuManagerError> {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
