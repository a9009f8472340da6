//! Tensor exchange with the external solvers.
//!
//! Provides:
//! - `TensorStore` trait for key-value tensor databases
//! - `InMemoryStore`, a shared in-process store
//! - `TensorKey` / `KeyRole` for the `ensemble_{i}.<role>` naming scheme

mod memory;

pub use memory::InMemoryStore;

use std::fmt;
use std::time::Duration;

/// Errors reported by a tensor store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key `{0}` does not exist")]
    KeyNotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-value store of named `f32` tensors.
///
/// Put/get/delete are atomic at key granularity. Nothing is assumed about
/// ordering across different keys.
pub trait TensorStore {
    /// Write (or overwrite) a tensor.
    fn put_tensor(&self, key: &str, data: &[f32]) -> StoreResult<()>;

    /// Read a tensor. Fails with `KeyNotFound` when absent.
    fn get_tensor(&self, key: &str) -> StoreResult<Vec<f32>>;

    /// Remove a tensor. Deleting an absent key is not an error.
    fn delete_tensor(&self, key: &str) -> StoreResult<()>;

    /// Check whether a tensor exists right now.
    fn tensor_exists(&self, key: &str) -> StoreResult<bool>;

    /// Wait for a key to appear.
    ///
    /// Checks up to `attempts` times, waiting `interval` between checks.
    /// Returns `Ok(false)` when the key never showed up.
    fn poll_tensor(&self, key: &str, interval: Duration, attempts: u32) -> StoreResult<bool> {
        for attempt in 0..attempts {
            if self.tensor_exists(key)? {
                return Ok(true);
            }
            if attempt + 1 < attempts {
                std::thread::sleep(interval);
            }
        }
        Ok(false)
    }
}

impl<S: TensorStore + ?Sized> TensorStore for &S {
    fn put_tensor(&self, key: &str, data: &[f32]) -> StoreResult<()> {
        (**self).put_tensor(key, data)
    }

    fn get_tensor(&self, key: &str) -> StoreResult<Vec<f32>> {
        (**self).get_tensor(key)
    }

    fn delete_tensor(&self, key: &str) -> StoreResult<()> {
        (**self).delete_tensor(key)
    }

    fn tensor_exists(&self, key: &str) -> StoreResult<bool> {
        (**self).tensor_exists(key)
    }

    fn poll_tensor(&self, key: &str, interval: Duration, attempts: u32) -> StoreResult<bool> {
        (**self).poll_tensor(key, interval, attempts)
    }
}

/// Role of a tensor exchanged with one CFD instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Time,
    StepType,
    State,
    Action,
    Reward,
}

impl KeyRole {
    pub const ALL: [KeyRole; 5] = [
        KeyRole::Time,
        KeyRole::StepType,
        KeyRole::State,
        KeyRole::Action,
        KeyRole::Reward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Time => "time",
            KeyRole::StepType => "step_type",
            KeyRole::State => "state",
            KeyRole::Action => "action",
            KeyRole::Reward => "reward",
        }
    }
}

/// Store key of one tensor of one CFD instance: `ensemble_{instance}.{role}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TensorKey {
    pub instance: usize,
    pub role: KeyRole,
}

impl TensorKey {
    pub fn new(instance: usize, role: KeyRole) -> Self {
        Self { instance, role }
    }

    /// Parse a key produced by `Display`. Returns `None` for foreign keys.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix("ensemble_")?;
        let (index, role) = rest.split_once('.')?;
        let instance = index.parse().ok()?;
        let role = KeyRole::ALL.into_iter().find(|r| r.as_str() == role)?;
        Some(Self { instance, role })
    }
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ensemble_{}.{}", self.instance, self.role.as_str())
    }
}
