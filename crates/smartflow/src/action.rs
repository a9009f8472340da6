//! Action rescaling and distribution to the CFD instances.

use crate::config::ActionBounds;
use crate::status::StatusTracker;
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::{Result, SmartflowError};
use ndarray::{Array2, ArrayView2};

/// Maps policy outputs in [-1, 1] onto the physical actuation range and
/// writes one action tensor per CFD instance.
#[derive(Clone, Debug)]
pub struct ActionDistributor {
    bounds: ActionBounds,
    marl_n_envs: usize,
    n_action: usize,
}

impl ActionDistributor {
    pub fn new(bounds: ActionBounds, marl_n_envs: usize, n_action: usize) -> Self {
        Self {
            bounds,
            marl_n_envs,
            n_action,
        }
    }

    pub fn bounds(&self) -> ActionBounds {
        self.bounds
    }

    /// `lower + 0.5 * (a + 1) * (upper - lower)`, with `a` clipped to [-1, 1].
    pub fn rescale(&self, a: f32) -> f32 {
        let a = a.clamp(-1.0, 1.0);
        self.bounds.lower + 0.5 * (a + 1.0) * (self.bounds.upper - self.bounds.lower)
    }

    /// Rescale a `(total_agents, n_action)` array.
    pub fn rescale_all(&self, actions: ArrayView2<f32>) -> Array2<f32> {
        actions.mapv(|a| self.rescale(a))
    }

    /// Concatenate agent rows into one row per instance.
    ///
    /// Agent `j` of an instance occupies columns `j*n_action .. (j+1)*n_action`.
    pub fn assemble(&self, scaled: ArrayView2<f32>) -> Result<Array2<f32>> {
        let total_agents = scaled.nrows();
        if scaled.ncols() != self.n_action || total_agents % self.marl_n_envs != 0 {
            return Err(SmartflowError::ShapeMismatch {
                what: "agent actions".to_string(),
                expected: vec![self.marl_n_envs, self.n_action],
                actual: scaled.shape().to_vec(),
            });
        }
        let cfd_n_envs = total_agents / self.marl_n_envs;
        let row_len = self.marl_n_envs * self.n_action;
        Ok(Array2::from_shape_fn((cfd_n_envs, row_len), |(i, c)| {
            let (j, k) = (c / self.n_action, c % self.n_action);
            scaled[[i * self.marl_n_envs + j, k]]
        }))
    }

    /// Rescale, assemble and write actions for every live instance.
    ///
    /// Returns the per-instance action rows that were built, including rows of
    /// ended instances, which are not written.
    pub fn distribute<S: TensorStore>(
        &self,
        store: &S,
        status: &StatusTracker,
        actions: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let cfd_actions = self.assemble(self.rescale_all(actions).view())?;
        for (instance, row) in cfd_actions.rows().into_iter().enumerate() {
            if !status.is_live(instance) {
                continue;
            }
            let key = TensorKey::new(instance, KeyRole::Action).to_string();
            let values = row.to_vec();
            store.put_tensor(&key, &values).map_err(|e| {
                tracing::warn!(instance, key = %key, error = %e, "action write failed");
                SmartflowError::Store(e)
            })?;
        }
        Ok(cfd_actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::status::StepType;
    use crate::store::InMemoryStore;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn distributor(marl_n_envs: usize, n_action: usize) -> ActionDistributor {
        ActionDistributor::new(
            ActionBounds {
                lower: -0.3,
                upper: 0.5,
            },
            marl_n_envs,
            n_action,
        )
    }

    fn tracker(store: &InMemoryStore, statuses: &[StepType]) -> StatusTracker {
        for (i, s) in statuses.iter().enumerate() {
            store
                .put_tensor(
                    &TensorKey::new(i, KeyRole::StepType).to_string(),
                    &[s.code() as f32],
                )
                .unwrap();
        }
        let mut tracker = StatusTracker::new(statuses.len());
        tracker
            .get_status(
                store,
                &PollConfig {
                    interval_ms: 1,
                    attempts: 1,
                    init_attempts: 1,
                },
            )
            .unwrap();
        tracker
    }

    #[test]
    fn test_rescale_endpoints() {
        let d = distributor(1, 1);
        assert_relative_eq!(d.rescale(-1.0), -0.3);
        assert_relative_eq!(d.rescale(1.0), 0.5);
        assert_relative_eq!(d.rescale(0.0), 0.1, epsilon = 1e-6);
        // Out-of-range policy outputs are clipped
        assert_relative_eq!(d.rescale(3.0), 0.5);
    }

    #[test]
    fn test_assemble_is_agent_major() {
        let d = distributor(2, 2);
        // 2 instances x 2 agents, 2 components each
        let scaled = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        let cfd = d.assemble(scaled.view()).unwrap();
        assert_eq!(cfd, array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
    }

    #[test]
    fn test_assemble_rejects_bad_shape() {
        let d = distributor(2, 1);
        assert!(d.assemble(Array2::zeros((3, 1)).view()).is_err());
        assert!(d.assemble(Array2::zeros((4, 2)).view()).is_err());
    }

    #[test]
    fn test_midpoint_scenario() {
        // 2 instances x 3 agents, 1 component, all zeros
        let store = InMemoryStore::new();
        let status = tracker(&store, &[StepType::Running, StepType::Running]);
        let d = distributor(3, 1);

        let cfd = d
            .distribute(&store, &status, Array2::zeros((6, 1)).view())
            .unwrap();
        assert_eq!(cfd.shape(), &[2, 3]);

        for instance in 0..2 {
            let written = store
                .get_tensor(&TensorKey::new(instance, KeyRole::Action).to_string())
                .unwrap();
            assert_eq!(written.len(), 3);
            for v in written {
                assert_relative_eq!(v, 0.1, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_ended_instances_are_not_written() {
        let store = InMemoryStore::new();
        let status = tracker(&store, &[StepType::Ended, StepType::Running]);
        let d = distributor(1, 1);

        d.distribute(&store, &status, array![[0.0], [0.0]].view())
            .unwrap();
        assert!(!store.tensor_exists("ensemble_0.action").unwrap());
        assert!(store.tensor_exists("ensemble_1.action").unwrap());
    }
}
