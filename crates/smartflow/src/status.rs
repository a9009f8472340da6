//! Lifecycle status of the CFD instances.
//!
//! Each solver publishes a `step_type` tensor. The tracker polls it once per
//! instance at startup and re-reads it afterwards; the cached vector gates all
//! other per-instance reads.

use crate::config::PollConfig;
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::{Result, SmartflowError};

/// Status code published under `ensemble_{i}.step_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepType {
    Ended = 0,
    Initialized = 1,
    Running = 2,
}

impl StepType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StepType::Ended),
            1 => Some(StepType::Initialized),
            2 => Some(StepType::Running),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Status code of an instance nobody has heard from yet.
pub const UNSET: i32 = -1;

/// Polls and caches the per-instance status vector.
pub struct StatusTracker {
    statuses: Vec<i32>,
    initialized: bool,
}

impl StatusTracker {
    pub fn new(cfd_n_envs: usize) -> Self {
        Self {
            statuses: vec![UNSET; cfd_n_envs],
            initialized: false,
        }
    }

    /// Forget everything; the next `get_status` performs the startup poll.
    pub fn reset_tracking(&mut self) {
        self.statuses.iter_mut().for_each(|s| *s = UNSET);
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Last status vector seen.
    pub fn statuses(&self) -> &[i32] {
        &self.statuses
    }

    /// Whether instance `i` may still be read from or written to.
    pub fn is_live(&self, instance: usize) -> bool {
        self.statuses[instance] > 0
    }

    pub fn any_live(&self) -> bool {
        self.statuses.iter().any(|&s| s > 0)
    }

    /// Refresh and return the status vector.
    ///
    /// The first call waits for every status key to appear and fails with
    /// `InitFailed` if any entry is still unset afterwards. Later calls re-read
    /// the live instances only; a failed read is attributed to its instance.
    pub fn get_status<S: TensorStore>(&mut self, store: &S, poll: &PollConfig) -> Result<&[i32]> {
        if !self.initialized {
            self.initialize(store, poll)?;
        } else {
            self.refresh(store)?;
        }
        Ok(&self.statuses)
    }

    fn initialize<S: TensorStore>(&mut self, store: &S, poll: &PollConfig) -> Result<()> {
        for instance in 0..self.statuses.len() {
            let key = TensorKey::new(instance, KeyRole::StepType).to_string();
            let present = store.poll_tensor(&key, poll.interval(), poll.init_attempts)?;
            if !present {
                tracing::error!(instance, key = %key, "status key never appeared");
                continue;
            }
            match store.get_tensor(&key) {
                Ok(values) => self.statuses[instance] = decode(&values),
                Err(e) => tracing::error!(instance, key = %key, error = %e, "status read failed"),
            }
        }

        if self.statuses.iter().any(|&s| s < 0) {
            tracing::error!(statuses = ?self.statuses, "ensemble failed to initialize");
            return Err(SmartflowError::InitFailed {
                statuses: self.statuses.clone(),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn refresh<S: TensorStore>(&mut self, store: &S) -> Result<()> {
        for instance in 0..self.statuses.len() {
            if !self.is_live(instance) {
                continue;
            }
            let key = TensorKey::new(instance, KeyRole::StepType).to_string();
            match store.get_tensor(&key) {
                Ok(values) => self.statuses[instance] = decode(&values),
                Err(source) => {
                    tracing::warn!(instance, key = %key, error = %source, "status read failed");
                    return Err(SmartflowError::ReadFailed {
                        instance,
                        key,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn decode(values: &[f32]) -> i32 {
    values.first().map_or(UNSET, |v| v.round() as i32)
}
