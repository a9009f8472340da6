//! Core environment trait definitions.

use crate::spaces::Box;
use crate::Result;
use ndarray::ArrayD;
use std::collections::HashMap;

/// Global agent id: `cfd_index * marl_n_envs + local_index`.
pub type AgentId = u32;

/// Per-agent observations keyed by agent id.
pub type Observations = HashMap<AgentId, ArrayD<f32>>;

/// Per-agent infos keyed by agent id.
pub type Infos = HashMap<AgentId, EnvInfo>;

/// Information returned for one agent
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    /// Episode return (if done)
    pub episode_return: Option<f32>,
    /// Episode length (if done)
    pub episode_length: Option<f32>,
    /// Custom metrics (kept minimal for performance)
    pub extra: smallvec::SmallVec<[(&'static str, f32); 4]>,
}

impl EnvInfo {
    /// Create empty info
    pub fn new() -> Self {
        Self::default()
    }

    /// Add episode stats
    pub fn with_episode_stats(mut self, ret: f32, len: u64) -> Self {
        self.episode_return = Some(ret);
        self.episode_length = Some(len as f32);
        self
    }

    /// Add a custom metric
    pub fn with_extra(mut self, key: &'static str, value: f32) -> Self {
        self.extra.push((key, value));
        self
    }

    /// Get a value by key (including episode stats)
    pub fn get(&self, key: &str) -> Option<f32> {
        match key {
            "episode_return" => self.episode_return,
            "episode_length" => self.episode_length,
            _ => self.extra.iter().find(|(k, _)| k == &key).map(|(_, v)| *v),
        }
    }
}

/// Result from a multi-agent environment step
///
/// Holds an entry for every agent that was active when the step began,
/// including the ones that finished during it.
#[derive(Clone, Debug, Default)]
pub struct MultiAgentStepResult {
    /// Observations for each agent
    pub observations: Observations,
    /// Rewards for each agent
    pub rewards: HashMap<AgentId, f32>,
    /// Agent's CFD instance reported the end of its run
    pub terminated: HashMap<AgentId, bool>,
    /// Episode step budget ran out
    pub truncated: HashMap<AgentId, bool>,
    /// Per-agent info
    pub infos: Infos,
}

impl MultiAgentStepResult {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Check if an agent is done (terminated or truncated)
    pub fn done(&self, agent: AgentId) -> bool {
        self.terminated.get(&agent).copied().unwrap_or(false)
            || self.truncated.get(&agent).copied().unwrap_or(false)
    }

    /// Done flags for every agent in the result
    pub fn dones(&self) -> HashMap<AgentId, bool> {
        self.observations
            .keys()
            .map(|&agent| (agent, self.done(agent)))
            .collect()
    }

    /// Agents of the result in ascending id order
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.observations.keys().copied().collect();
        agents.sort_unstable();
        agents
    }
}

/// Parallel multi-agent environment: every active agent acts at each step.
///
/// # Example
///
/// ```rust,ignore
/// let (mut obs, _) = env.reset()?;
/// while !env.is_done() {
///     let actions = obs
///         .keys()
///         .map(|&agent| (agent, env.action_space(agent).sample(&mut rng)))
///         .collect();
///     let result = env.step(&actions)?;
///     obs = result.observations;
/// }
/// env.close()?;
/// ```
pub trait ParallelEnv {
    /// Every agent the environment can ever contain
    fn possible_agents(&self) -> Vec<AgentId>;

    /// Agents still active in the current episode
    fn agents(&self) -> Vec<AgentId>;

    /// Observation space of one agent
    fn observation_space(&self, agent: AgentId) -> Box;

    /// Action space of one agent
    fn action_space(&self, agent: AgentId) -> Box;

    /// Start a new episode
    ///
    /// # Returns
    /// Tuple of (initial observations, infos) for every agent
    fn reset(&mut self) -> Result<(Observations, Infos)>;

    /// Advance every active agent by one step
    ///
    /// # Arguments
    /// * `actions` - Map of agent ID to action
    fn step(&mut self, actions: &HashMap<AgentId, ArrayD<f32>>) -> Result<MultiAgentStepResult>;

    /// Close the environment and free resources
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Get total number of agents (max population)
    fn num_agents(&self) -> usize {
        self.possible_agents().len()
    }

    /// Check if every agent is done and the environment needs reset
    fn is_done(&self) -> bool {
        self.agents().is_empty()
    }
}
