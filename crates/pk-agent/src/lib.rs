//! pk-agent: agent-side half of the pokelink bridge
//!
//! - `client`: writes command documents, reads snapshots, waits out resets
//! - `stale`: notices when the emulator stops publishing new frames
//! - `policy`: the decision seam plus random and scripted baselines
//! - `agent_loop`: read, decide, submit, repeat

pub mod agent_loop;
pub mod client;
pub mod error;
pub mod policy;
pub mod stale;

pub use agent_loop::{AgentLoop, LoopStats, StepReport};
pub use client::{new_command_id, BridgeClient, ResetWait};
pub use error::AgentError;
pub use policy::{action_button, Decision, Policy, RandomPolicy, ScriptedPolicy, ACTIONS};
pub use stale::{is_stale, Freshness, Observation, StaleDetector};
