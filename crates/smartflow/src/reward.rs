//! Local/global reward aggregation.
//!
//! Each CFD instance publishes a local reward tensor of `marl_n_envs * n_reward`
//! values. Viewed as a `(marl_n_envs, n_reward)` matrix its columns are:
//!
//! | column          | meaning                                  |
//! |-----------------|------------------------------------------|
//! | 0               | mean streamwise velocity indicator       |
//! | 1               | wall shear stress                        |
//! | 2               | unused                                   |
//! | 3..n_reward     | velocity profile samples, wall outward   |
//!
//! Every agent gets a local reward from its own row and every instance a
//! global reward from the across-agent means. The final reward blends the two
//! with `beta`.

use crate::config::{EnvConfig, PollConfig, RewardConfig};
use crate::reference::ReferenceProfile;
use crate::state::{poll_read, Consume};
use crate::status::StatusTracker;
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::{Result, SmartflowError};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

const COL_BULK: usize = 0;
const COL_WALL_SHEAR: usize = 1;
const COL_PROFILE: usize = 3;

/// Per-agent and per-instance rewards of one step.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentRewards {
    /// Blended reward, one per agent
    pub blended: Array1<f32>,
    /// Local component, one per agent
    pub local: Array1<f32>,
    /// Global component, one per instance
    pub global: Array1<f32>,
}

impl AgentRewards {
    pub fn zeros(cfd_n_envs: usize, marl_n_envs: usize) -> Self {
        let total = cfd_n_envs * marl_n_envs;
        Self {
            blended: Array1::zeros(total),
            local: Array1::zeros(total),
            global: Array1::zeros(cfd_n_envs),
        }
    }
}

/// Error terms of one agent, or of an instance's aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Terms {
    profile: f32,
    wall_shear: f32,
    bulk: f32,
}

/// Computes blended rewards from local reward tensors.
pub struct RewardAggregator {
    config: RewardConfig,
    marl_n_envs: usize,
    n_reward: usize,
    references: Vec<ReferenceProfile>,
}

impl RewardAggregator {
    /// Build from the environment config and one reference per CFD instance.
    pub fn new(config: &EnvConfig, references: Vec<ReferenceProfile>) -> Result<Self> {
        if references.len() != config.cfd_n_envs {
            return Err(SmartflowError::Config(format!(
                "{} reference profiles for {} CFD instances",
                references.len(),
                config.cfd_n_envs
            )));
        }
        let n_wall_points = config.reward.n_wall_points;
        if let Some((instance, r)) = references
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() < n_wall_points)
        {
            return Err(SmartflowError::Config(format!(
                "reference profile of instance {instance} has {} samples, {n_wall_points} needed",
                r.len()
            )));
        }
        Ok(Self {
            config: config.reward.clone(),
            marl_n_envs: config.marl_n_envs,
            n_reward: config.n_reward,
            references,
        })
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn references(&self) -> &[ReferenceProfile] {
        &self.references
    }

    /// Read the local reward tensor of every live instance into `rewards`.
    ///
    /// Reward keys are consumed. Rows of ended instances are left as they are.
    pub fn fetch_rewards<S: TensorStore>(
        &self,
        store: &S,
        status: &StatusTracker,
        poll: &PollConfig,
        rewards: &mut Array2<f32>,
    ) -> Result<()> {
        let len = rewards.ncols();
        for instance in 0..rewards.nrows() {
            if !status.is_live(instance) {
                continue;
            }
            let key = TensorKey::new(instance, KeyRole::Reward);
            let values = poll_read(store, key, poll, len, Consume::Delete)?;
            rewards
                .row_mut(instance)
                .iter_mut()
                .zip(values)
                .for_each(|(dst, v)| *dst = v);
        }
        Ok(())
    }

    /// Rewards for every agent. Agents of ended instances get zero.
    pub fn compute(&self, rewards: ArrayView2<f32>, status: &StatusTracker) -> AgentRewards {
        let mut out = AgentRewards::zeros(rewards.nrows(), self.marl_n_envs);
        for (instance, row) in rewards.rows().into_iter().enumerate() {
            if !status.is_live(instance) {
                continue;
            }
            let (local, global) = self.instance_rewards(instance, row);
            let (start, end) = (instance * self.marl_n_envs, (instance + 1) * self.marl_n_envs);
            out.blended
                .slice_mut(s![start..end])
                .assign(&self.blend(global, local.view()));
            out.local.slice_mut(s![start..end]).assign(&local);
            out.global[instance] = global;
        }
        out
    }

    /// Local rewards of the agents of one instance and its global reward.
    pub fn instance_rewards(&self, instance: usize, row: ArrayView1<f32>) -> (Array1<f32>, f32) {
        let reference = &self.references[instance];
        let per_agent = Array2::from_shape_fn((self.marl_n_envs, self.n_reward), |(j, c)| {
            row[j * self.n_reward + c]
        });

        let local: Array1<f32> = per_agent
            .rows()
            .into_iter()
            .map(|agent| {
                let terms = Terms {
                    profile: self.profile_error(agent.slice(s![COL_PROFILE..]), reference),
                    wall_shear: (agent[COL_WALL_SHEAR] - reference.tau_wall).abs(),
                    bulk: (agent[COL_BULK] - self.config.target_bulk_velocity).abs(),
                };
                self.shape(terms)
            })
            .collect();

        let mean = per_agent.sum_axis(Axis(0)) / self.marl_n_envs as f32;
        let global = self.shape(Terms {
            profile: self.profile_error(mean.slice(s![COL_PROFILE..]), reference),
            wall_shear: (mean[COL_WALL_SHEAR] - reference.tau_wall).abs(),
            bulk: (mean[COL_BULK] - self.config.target_bulk_velocity).abs(),
        });

        (local, global)
    }

    /// `beta * global + (1 - beta) * local`
    pub fn blend(&self, global: f32, local: ArrayView1<f32>) -> Array1<f32> {
        let beta = self.config.beta;
        local.mapv(|l| beta * global + (1.0 - beta) * l)
    }

    /// Spacing-weighted squared deviation over the near-wall points.
    fn profile_error(&self, samples: ArrayView1<f32>, reference: &ReferenceProfile) -> f32 {
        samples
            .iter()
            .zip(&reference.u)
            .zip(&reference.weights)
            .take(self.config.n_wall_points)
            .map(|((&u, &u_ref), &w)| w * (u - u_ref).powi(2))
            .sum()
    }

    fn shape(&self, terms: Terms) -> f32 {
        let c = &self.config;
        c.offset
            - (c.profile_coef * terms.profile
                + c.wall_shear_coef * terms.wall_shear
                + c.bulk_velocity_coef * terms.bulk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StepType;
    use crate::store::InMemoryStore;
    use approx::assert_relative_eq;
    use ndarray::array;

    // 2 agents, 5 reward columns (2 profile samples)
    fn config(beta: f32) -> EnvConfig {
        let mut config = EnvConfig::default().layout(1, 2).sizes(4, 2, 1, 5);
        config.reward = RewardConfig {
            beta,
            profile_coef: 1.0,
            wall_shear_coef: 10.0,
            bulk_velocity_coef: 0.0,
            target_bulk_velocity: 1.0,
            offset: 0.0,
            n_wall_points: 2,
        };
        config
    }

    fn reference() -> ReferenceProfile {
        // weights [1.0, 1.0]
        ReferenceProfile::new(0.5, vec![1.0, 2.0], vec![1.0, 2.0]).unwrap()
    }

    fn live_tracker(n: usize) -> StatusTracker {
        let store = InMemoryStore::new();
        for i in 0..n {
            store
                .put_tensor(
                    &TensorKey::new(i, KeyRole::StepType).to_string(),
                    &[StepType::Running.code() as f32],
                )
                .unwrap();
        }
        let mut tracker = StatusTracker::new(n);
        tracker
            .get_status(
                &store,
                &PollConfig {
                    interval_ms: 1,
                    attempts: 1,
                    init_attempts: 1,
                },
            )
            .unwrap();
        tracker
    }

    // agent 0: exact profile, tau 0.5 -> zero error
    // agent 1: profile off by [1, 1], tau 0.7
    fn row() -> Array1<f32> {
        array![1.0, 0.5, 0.0, 1.0, 2.0, 1.0, 0.7, 0.0, 2.0, 3.0]
    }

    #[test]
    fn test_local_and_global_terms() {
        let aggregator = RewardAggregator::new(&config(0.0), vec![reference()]).unwrap();
        let (local, global) = aggregator.instance_rewards(0, row().view());

        assert_relative_eq!(local[0], 0.0);
        // profile: 1 + 1, wall shear: 10 * 0.2
        assert_relative_eq!(local[1], -4.0, epsilon = 1e-5);
        // mean profile off by [0.5, 0.5] -> 0.5, mean tau 0.6 -> 10 * 0.1
        assert_relative_eq!(global, -1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_beta_zero_is_local_only() {
        let aggregator = RewardAggregator::new(&config(0.0), vec![reference()]).unwrap();
        let rewards = row().into_shape((1, 10)).unwrap();
        let out = aggregator.compute(rewards.view(), &live_tracker(1));
        assert_eq!(out.blended, out.local);
    }

    #[test]
    fn test_beta_one_is_global_for_every_agent() {
        let aggregator = RewardAggregator::new(&config(1.0), vec![reference()]).unwrap();
        let rewards = row().into_shape((1, 10)).unwrap();
        let out = aggregator.compute(rewards.view(), &live_tracker(1));
        assert_relative_eq!(out.blended[0], out.global[0]);
        assert_relative_eq!(out.blended[1], out.global[0]);
    }

    #[test]
    fn test_blend_mixes_components() {
        let aggregator = RewardAggregator::new(&config(0.25), vec![reference()]).unwrap();
        let blended = aggregator.blend(-2.0, array![0.0, -4.0].view());
        assert_relative_eq!(blended[0], -0.5);
        assert_relative_eq!(blended[1], -3.5);
    }

    #[test]
    fn test_zero_coefficients_ablate_terms() {
        let mut cfg = config(0.0);
        cfg.reward.profile_coef = 0.0;
        cfg.reward.wall_shear_coef = 0.0;
        cfg.reward.offset = 1.0;
        let aggregator = RewardAggregator::new(&cfg, vec![reference()]).unwrap();
        let (local, global) = aggregator.instance_rewards(0, row().view());
        assert_eq!(local.to_vec(), vec![1.0, 1.0]);
        assert_relative_eq!(global, 1.0);
    }

    #[test]
    fn test_bulk_velocity_term() {
        let mut cfg = config(0.0);
        cfg.reward.profile_coef = 0.0;
        cfg.reward.wall_shear_coef = 0.0;
        cfg.reward.bulk_velocity_coef = 2.0;
        cfg.reward.target_bulk_velocity = 0.5;
        let aggregator = RewardAggregator::new(&cfg, vec![reference()]).unwrap();
        let (local, _) = aggregator.instance_rewards(0, row().view());
        assert_relative_eq!(local[0], -1.0);
        assert_relative_eq!(local[1], -1.0);
    }

    #[test]
    fn test_wall_points_restrict_profile_error() {
        let mut cfg = config(0.0);
        cfg.reward.wall_shear_coef = 0.0;
        cfg.reward.n_wall_points = 1;
        let aggregator = RewardAggregator::new(&cfg, vec![reference()]).unwrap();
        let (local, _) = aggregator.instance_rewards(0, row().view());
        assert_relative_eq!(local[1], -1.0);
    }

    #[test]
    fn test_reference_count_must_match() {
        let err = RewardAggregator::new(&config(0.0), vec![]).err().unwrap();
        assert!(matches!(err, SmartflowError::Config(_)));

        let short = ReferenceProfile::new(0.5, vec![1.0], vec![1.0]).unwrap();
        assert!(RewardAggregator::new(&config(0.0), vec![short]).is_err());
    }

    #[test]
    fn test_fetch_rewards_consumes_keys() {
        let store = InMemoryStore::new();
        let tracker = live_tracker(1);
        let key = TensorKey::new(0, KeyRole::Reward).to_string();
        store.put_tensor(&key, row().as_slice().unwrap()).unwrap();

        let aggregator = RewardAggregator::new(&config(0.0), vec![reference()]).unwrap();
        let mut rewards = Array2::zeros((1, 10));
        aggregator
            .fetch_rewards(
                &store,
                &tracker,
                &PollConfig {
                    interval_ms: 1,
                    attempts: 2,
                    init_attempts: 2,
                },
                &mut rewards,
            )
            .unwrap();
        assert_eq!(rewards.row(0), row());
        assert!(!store.tensor_exists(&key).unwrap());
    }
}
