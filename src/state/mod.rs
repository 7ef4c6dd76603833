//! Dual-level CPU assignment state.
//!
//! Two layers, composed:
//!
//! * [`CheckpointState`] – the durable layer: `container id → CpuSet` plus
//!   the default CPU set, rewritten to disk on every mutation.
//! * [`RtState`] – the in-memory real-time layer on top: per-container
//!   utilisation shares and the derived per-CPU accumulated utilisation the
//!   placement algorithm bids against.
//!
//! The derived per-CPU index is never persisted; it is rebuilt from scratch
//! when the policy (re)starts.

mod checkpoint;
mod rt;

pub use checkpoint::{CheckpointState, CPU_MANAGER_STATE_FILE};
pub use rt::RtState;
