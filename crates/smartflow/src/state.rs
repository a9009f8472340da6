//! State fetch and redistribution.

use crate::config::PollConfig;
use crate::status::StatusTracker;
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::{Result, SmartflowError};
use ndarray::{s, Array2, ArrayView2};

/// Whether a polled tensor is removed from the store after reading it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Consume {
    Delete,
    Keep,
}

/// Poll for one instance tensor, read it and check its length.
///
/// Failures are attributed to `instance` and logged before returning.
pub(crate) fn poll_read<S: TensorStore>(
    store: &S,
    key: TensorKey,
    poll: &PollConfig,
    expected_len: usize,
    consume: Consume,
) -> Result<Vec<f32>> {
    let instance = key.instance;
    let key = key.to_string();

    let present = store
        .poll_tensor(&key, poll.interval(), poll.attempts)
        .map_err(|source| SmartflowError::ReadFailed {
            instance,
            key: key.clone(),
            source,
        })?;
    if !present {
        tracing::warn!(instance, key = %key, attempts = poll.attempts, "tensor did not appear");
        return Err(SmartflowError::ReadTimeout {
            instance,
            key,
            attempts: poll.attempts,
        });
    }

    let values = match store.get_tensor(&key) {
        Ok(values) => values,
        Err(source) => {
            tracing::warn!(instance, key = %key, error = %source, "tensor read failed");
            return Err(SmartflowError::ReadFailed {
                instance,
                key,
                source,
            });
        }
    };
    if consume == Consume::Delete {
        store
            .delete_tensor(&key)
            .map_err(|source| SmartflowError::ReadFailed {
                instance,
                key: key.clone(),
                source,
            })?;
    }

    if values.len() != expected_len {
        tracing::warn!(instance, key = %key, len = values.len(), expected_len, "tensor has wrong length");
        return Err(SmartflowError::ShapeMismatch {
            what: key,
            expected: vec![expected_len],
            actual: vec![values.len()],
        });
    }
    Ok(values)
}

/// Read the state of every live instance into its row of `states`.
///
/// Each state key is consumed so the next poll waits for a fresh write.
/// Rows of ended instances keep their previous contents. On failure, rows
/// already read stay valid and the failing row is left untouched.
pub fn fetch_states<S: TensorStore>(
    store: &S,
    status: &StatusTracker,
    poll: &PollConfig,
    states: &mut Array2<f32>,
) -> Result<()> {
    let n_state = states.ncols();
    for instance in 0..states.nrows() {
        if !status.is_live(instance) {
            continue;
        }
        let key = TensorKey::new(instance, KeyRole::State);
        let values = poll_read(store, key, poll, n_state, Consume::Delete)?;
        states
            .row_mut(instance)
            .iter_mut()
            .zip(values)
            .for_each(|(dst, v)| *dst = v);
    }
    Ok(())
}

/// Split CFD-level states into pseudo-agent observations.
///
/// Agent `(i, j)` observes `states[i, j*psenv .. j*psenv + n_state_marl]`
/// where `psenv = n_state / marl_n_envs`. The result has one row per agent,
/// in global agent order.
pub fn redistribute(states: ArrayView2<f32>, marl_n_envs: usize, n_state_marl: usize) -> Array2<f32> {
    let psenv = states.ncols() / marl_n_envs;
    debug_assert!(n_state_marl <= psenv);

    let mut agent_states = Array2::zeros((states.nrows() * marl_n_envs, n_state_marl));
    for (i, state) in states.rows().into_iter().enumerate() {
        for j in 0..marl_n_envs {
            let start = j * psenv;
            agent_states
                .row_mut(i * marl_n_envs + j)
                .assign(&state.slice(s![start..start + n_state_marl]));
        }
    }
    agent_states
}
