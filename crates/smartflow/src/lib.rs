//! # smartflow
//!
//! A multi-agent reinforcement learning environment backed by an ensemble of
//! external CFD solvers.
//!
//! ## Overview
//!
//! smartflow provides:
//! - The `ParallelEnv` trait for PettingZoo-style parallel multi-agent environments
//! - `CfdEnv`, which drives N external solver instances through a shared tensor store
//! - State redistribution, reward aggregation and action distribution between
//!   the CFD-instance granularity and the pseudo-agent granularity
//! - A `TensorStore` abstraction with an in-memory implementation
//! - A `ProcessEnsemble` abstraction with a synthetic solver ensemble for
//!   smoke runs and tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smartflow::prelude::*;
//!
//! let config = EnvConfig::from_json_file("smartflow.json")?;
//! let store = InMemoryStore::new();
//! let ensemble = SyntheticEnsemble::new(store.clone(), SyntheticConfig::from_env(&config));
//! let mut env = CfdEnv::new(config, store, ensemble)?;
//!
//! let (obs, _infos) = env.reset()?;
//! let actions = obs.keys().map(|&id| (id, ArrayD::zeros(IxDyn(&[1])))).collect();
//! let result = env.step(&actions)?;
//! ```

pub mod action;
pub mod config;
pub mod ensemble;
pub mod env;
pub mod layout;
pub mod log;
pub mod reference;
pub mod reward;
pub mod spaces;
pub mod state;
pub mod status;
pub mod store;
pub mod trajectory;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ActionBounds, EnvConfig, ModeConfig, PollConfig, RewardConfig, RunMode};
    pub use crate::ensemble::{ProcessEnsemble, SyntheticConfig, SyntheticEnsemble};
    pub use crate::env::{AgentId, CfdEnv, EnvInfo, EnvPhase, MultiAgentStepResult, ParallelEnv};
    pub use crate::layout::AgentLayout;
    pub use crate::log::{ConsoleLogger, EpisodeSummary, MemoryLogger, MetricLogger, NoOpLogger};
    pub use crate::reference::ReferenceProfile;
    pub use crate::spaces::{Box, Space};
    pub use crate::status::StepType;
    pub use crate::store::{InMemoryStore, KeyRole, TensorKey, TensorStore};
    pub use crate::{Result, SmartflowError};
    pub use ndarray::{ArrayD, IxDyn};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::path::PathBuf;
use store::StoreError;

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum SmartflowError {
    /// At least one instance never published a usable status during startup.
    #[error("ensemble initialization failed: status vector {statuses:?} has unset entries")]
    InitFailed { statuses: Vec<i32> },

    /// An instance reported a status that is not INITIALIZED or RUNNING during startup.
    #[error("CFD instance {instance} is not live after start (status {status})")]
    InstanceNotLive { instance: usize, status: i32 },

    #[error("CFD instance {instance}: `{key}` not available after {attempts} polls")]
    ReadTimeout {
        instance: usize,
        key: String,
        attempts: u32,
    },

    #[error("CFD instance {instance}: could not read `{key}`: {source}")]
    ReadFailed {
        instance: usize,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid reference file {path}: {reason}")]
    Reference { path: PathBuf, reason: String },

    #[error("Tensor store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ensemble error: {0}")]
    Ensemble(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmartflowError {
    /// Whether the error leaves the environment unusable until a fresh start.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SmartflowError::InitFailed { .. } | SmartflowError::InstanceNotLive { .. }
        )
    }

    /// CFD instance the error is attributed to, if any.
    pub fn instance(&self) -> Option<usize> {
        match self {
            SmartflowError::InstanceNotLive { instance, .. }
            | SmartflowError::ReadTimeout { instance, .. }
            | SmartflowError::ReadFailed { instance, .. } => Some(*instance),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SmartflowError>;
