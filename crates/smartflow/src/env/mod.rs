//! Environment traits and the CFD environment.
//!
//! Provides the `ParallelEnv` trait for parallel multi-agent environments and
//! `CfdEnv`, which implements it on top of an ensemble of external solvers.

mod cfd;
mod traits;

pub use cfd::{CfdEnv, EnvPhase};
pub use traits::{AgentId, EnvInfo, Infos, MultiAgentStepResult, Observations, ParallelEnv};
