//! Agent
//!
//! The facade over the task queue ([`AgentCore`]), the bounded and
//! continuous autonomy loops with their controller, and reflection over the
//! execution log.

pub mod autonomy;
pub mod core;
pub mod reflection;

pub use autonomy::{
    AutonomyController, CycleReport, LoopPhase, RunKind, StopReason, StopToken, MAX_CYCLE_STEPS,
};
pub use self::core::AgentCore;
pub use reflection::{export_logs, reflect, Bias, Reflection};
