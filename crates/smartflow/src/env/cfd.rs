//! Multi-agent environment on top of an ensemble of external CFD solvers.

use super::traits::{AgentId, EnvInfo, Infos, MultiAgentStepResult, Observations, ParallelEnv};
use crate::action::ActionDistributor;
use crate::config::EnvConfig;
use crate::ensemble::ProcessEnsemble;
use crate::layout::AgentLayout;
use crate::reference::ReferenceProfile;
use crate::reward::{AgentRewards, RewardAggregator};
use crate::spaces::Box;
use crate::state::{self, Consume};
use crate::status::{StatusTracker, StepType};
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::trajectory::{Category, TrajectoryWriter};
use crate::{Result, SmartflowError};
use ndarray::{s, Array1, Array2, ArrayD};
use std::collections::{HashMap, HashSet};

/// Lifecycle phase of a [`CfdEnv`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvPhase {
    /// Constructed, never reset
    Uninitialized,
    /// A reset is in progress or failed part-way
    ResetPending,
    /// At least one agent is active
    Running,
    /// Every agent is done; the next call should be `reset`
    EpisodeDone,
}

/// Parallel multi-agent environment driving `cfd_n_envs` solver instances,
/// each shared by `marl_n_envs` pseudo-agents.
///
/// All exchange with the solvers goes through the tensor store `S`; the
/// solver processes themselves are started and stopped by `P`.
pub struct CfdEnv<S, P> {
    config: EnvConfig,
    layout: AgentLayout,
    store: S,
    ensemble: P,
    status: StatusTracker,
    rewards: RewardAggregator,
    actions: ActionDistributor,
    trajectories: Option<TrajectoryWriter>,
    phase: EnvPhase,
    /// Active agents in ascending order
    roster: Vec<AgentId>,

    // Instance-indexed buffers
    cfd_states: Array2<f32>,
    cfd_rewards: Array2<f32>,
    cfd_actions: Array2<f32>,
    solver_times: Array1<f32>,

    // Agent-indexed buffers
    agent_states: Array2<f32>,
    agent_rewards: AgentRewards,
    agent_actions: Array2<f32>,
    episode_returns: Array1<f32>,

    episode_step: u64,
    global_step: u64,
    episode: u64,
}

impl<S, P> CfdEnv<S, P>
where
    S: TensorStore,
    P: ProcessEnsemble,
{
    /// Validate the configuration and load the reference case of every
    /// instance from disk.
    pub fn new(config: EnvConfig, store: S, ensemble: P) -> Result<Self> {
        config.validate()?;
        let references = ReferenceProfile::load_for_ensemble(&config)?;
        Self::with_references(config, store, ensemble, references)
    }

    /// Build with reference profiles supplied by the caller, one per instance.
    pub fn with_references(
        config: EnvConfig,
        store: S,
        ensemble: P,
        references: Vec<ReferenceProfile>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = AgentLayout::new(config.cfd_n_envs, config.marl_n_envs);
        let rewards = RewardAggregator::new(&config, references)?;
        let actions =
            ActionDistributor::new(config.action_bounds, config.marl_n_envs, config.n_action);
        let trajectories = if config.dump_trajectories {
            Some(TrajectoryWriter::new(
                config.mode_config().trajectory_dir.clone(),
            )?)
        } else {
            None
        };

        let (n_cfd, n_agents) = (config.cfd_n_envs, config.total_agents());
        Ok(Self {
            layout,
            store,
            ensemble,
            status: StatusTracker::new(n_cfd),
            rewards,
            actions,
            trajectories,
            phase: EnvPhase::Uninitialized,
            roster: Vec::new(),
            cfd_states: Array2::zeros((n_cfd, config.n_state)),
            cfd_rewards: Array2::zeros((n_cfd, config.marl_n_envs * config.n_reward)),
            cfd_actions: Array2::zeros((n_cfd, config.marl_n_envs * config.n_action)),
            solver_times: Array1::zeros(n_cfd),
            agent_states: Array2::zeros((n_agents, config.n_state_marl)),
            agent_rewards: AgentRewards::zeros(n_cfd, config.marl_n_envs),
            agent_actions: Array2::zeros((n_agents, config.n_action)),
            episode_returns: Array1::zeros(n_agents),
            episode_step: 0,
            global_step: 0,
            episode: 0,
            config,
        })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn layout(&self) -> AgentLayout {
        self.layout
    }

    pub fn phase(&self) -> EnvPhase {
        self.phase
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ensemble(&self) -> &P {
        &self.ensemble
    }

    /// Last status vector seen, one entry per instance.
    pub fn statuses(&self) -> &[i32] {
        self.status.statuses()
    }

    /// Steps taken in the current episode.
    pub fn episode_step(&self) -> u64 {
        self.episode_step
    }

    /// Steps taken since construction, across episodes.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Index of the current episode, starting at 0.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Raw CFD-level states, one row per instance.
    pub fn cfd_states(&self) -> &Array2<f32> {
        &self.cfd_states
    }

    /// Raw reward tensors, one row per instance.
    pub fn cfd_rewards(&self) -> &Array2<f32> {
        &self.cfd_rewards
    }

    /// Rescaled actions of the last step, one row per instance.
    pub fn cfd_actions(&self) -> &Array2<f32> {
        &self.cfd_actions
    }

    /// Observations of every agent, active or not.
    pub fn agent_states(&self) -> &Array2<f32> {
        &self.agent_states
    }

    /// Reward components of the last step.
    pub fn agent_rewards(&self) -> &AgentRewards {
        &self.agent_rewards
    }

    /// Accumulated reward of each agent in the current episode.
    pub fn episode_returns(&self) -> &Array1<f32> {
        &self.episode_returns
    }

    pub fn solver_times(&self) -> &Array1<f32> {
        &self.solver_times
    }

    fn observation(&self, agent: AgentId) -> ArrayD<f32> {
        self.agent_states.row(agent as usize).to_owned().into_dyn()
    }

    fn base_info(&self, agent: AgentId) -> EnvInfo {
        let instance = self.layout.instance_of(agent);
        let mut info = EnvInfo::new()
            .with_extra("instance", instance as f32)
            .with_extra("status", self.status.statuses()[instance] as f32);
        if self.config.read_solver_time {
            info = info.with_extra("solver_time", self.solver_times[instance]);
        }
        info
    }

    /// Start the ensemble and read the first state of every instance.
    fn start_episode(&mut self) -> Result<()> {
        let tags: Vec<usize> = (0..self.layout.cfd_n_envs).collect();
        self.ensemble.start(&tags)?;

        let statuses = self.status.get_status(&self.store, &self.config.poll)?;
        let not_live = statuses.iter().enumerate().find(|(_, &code)| {
            !matches!(
                StepType::from_code(code),
                Some(StepType::Initialized | StepType::Running)
            )
        });
        if let Some((instance, &status)) = not_live {
            tracing::error!(instance, status, "instance is not live after startup");
            return Err(SmartflowError::InstanceNotLive { instance, status });
        }

        self.fetch_observations()
    }

    /// Read state, reward and optionally solver time of the live instances.
    fn fetch_observations(&mut self) -> Result<()> {
        state::fetch_states(&self.store, &self.status, &self.config.poll, &mut self.cfd_states)?;
        self.rewards.fetch_rewards(
            &self.store,
            &self.status,
            &self.config.poll,
            &mut self.cfd_rewards,
        )?;
        if self.config.read_solver_time {
            self.fetch_solver_times()?;
        }
        self.agent_states = state::redistribute(
            self.cfd_states.view(),
            self.config.marl_n_envs,
            self.config.n_state_marl,
        );
        Ok(())
    }

    fn fetch_solver_times(&mut self) -> Result<()> {
        for instance in 0..self.layout.cfd_n_envs {
            if !self.status.is_live(instance) {
                continue;
            }
            let key = TensorKey::new(instance, KeyRole::Time);
            let time = state::poll_read(&self.store, key, &self.config.poll, 1, Consume::Keep)?;
            self.solver_times[instance] = time[0];
        }
        Ok(())
    }

    /// Fill the agent action buffer from the action map.
    ///
    /// Agents missing from the map act with zeros. Entries for agents that
    /// are not active are ignored.
    fn gather_actions(&mut self, actions: &HashMap<AgentId, ArrayD<f32>>) -> Result<()> {
        self.agent_actions.fill(0.0);
        let n_action = self.config.n_action;
        for &agent in &self.roster {
            let Some(action) = actions.get(&agent) else {
                continue;
            };
            if action.len() != n_action {
                return Err(SmartflowError::ShapeMismatch {
                    what: format!("action of agent {agent}"),
                    expected: vec![n_action],
                    actual: action.shape().to_vec(),
                });
            }
            self.agent_actions
                .row_mut(agent as usize)
                .iter_mut()
                .zip(action.iter())
                .for_each(|(dst, &a)| *dst = a);
        }
        Ok(())
    }

    /// Append one line per live instance and category.
    ///
    /// `live` is the set of instances that produced data this step.
    fn dump_step(&self, live: &[usize], state_only: bool) -> Result<()> {
        let Some(writer) = &self.trajectories else {
            return Ok(());
        };
        for &instance in live {
            let agents = self.layout.agents_of(instance);
            let states: Vec<f32> = self
                .agent_states
                .slice(s![agents.clone(), ..])
                .iter()
                .copied()
                .collect();
            writer.append(Category::State, instance, self.episode, Array1::from(states).view())?;
            if state_only {
                continue;
            }
            writer.append(
                Category::LocalReward,
                instance,
                self.episode,
                self.agent_rewards.local.slice(s![agents]),
            )?;
            writer.append(
                Category::Action,
                instance,
                self.episode,
                self.cfd_actions.row(instance),
            )?;
        }
        Ok(())
    }

    fn stop_ensemble(&mut self) -> Result<()> {
        if self.ensemble.is_running() {
            self.ensemble.stop()?;
        }
        Ok(())
    }
}

impl<S, P> ParallelEnv for CfdEnv<S, P>
where
    S: TensorStore,
    P: ProcessEnsemble,
{
    fn possible_agents(&self) -> Vec<AgentId> {
        self.layout.all_agents()
    }

    fn agents(&self) -> Vec<AgentId> {
        self.roster.clone()
    }

    fn observation_space(&self, _agent: AgentId) -> Box {
        Box::unbounded(&[self.config.n_state_marl])
    }

    fn action_space(&self, _agent: AgentId) -> Box {
        Box::symmetric(&[self.config.n_action])
    }

    fn reset(&mut self) -> Result<(Observations, Infos)> {
        if self.phase != EnvPhase::Uninitialized {
            self.episode += 1;
        }
        tracing::info!(episode = self.episode, "resetting environment");

        self.stop_ensemble()?;
        self.phase = EnvPhase::ResetPending;
        self.roster.clear();
        self.cfd_states.fill(0.0);
        self.cfd_rewards.fill(0.0);
        self.cfd_actions.fill(0.0);
        self.solver_times.fill(0.0);
        self.agent_actions.fill(0.0);
        self.agent_rewards = AgentRewards::zeros(self.layout.cfd_n_envs, self.layout.marl_n_envs);
        self.episode_returns.fill(0.0);
        self.episode_step = 0;
        self.status.reset_tracking();

        if let Err(e) = self.start_episode() {
            if e.is_fatal() {
                tracing::error!(error = %e, "ensemble startup failed");
            }
            if let Err(stop_err) = self.ensemble.stop() {
                tracing::warn!(error = %stop_err, "failed to stop ensemble after startup error");
            }
            return Err(e);
        }

        let all: Vec<usize> = (0..self.layout.cfd_n_envs).collect();
        self.dump_step(&all, true)?;

        self.roster = self.layout.all_agents();
        self.phase = EnvPhase::Running;

        let observations = self
            .roster
            .iter()
            .map(|&agent| (agent, self.observation(agent)))
            .collect();
        let infos = self
            .roster
            .iter()
            .map(|&agent| (agent, self.base_info(agent)))
            .collect();
        Ok((observations, infos))
    }

    fn step(&mut self, actions: &HashMap<AgentId, ArrayD<f32>>) -> Result<MultiAgentStepResult> {
        if self.roster.is_empty() {
            return Ok(MultiAgentStepResult::default());
        }
        if self.phase != EnvPhase::Running {
            return Err(SmartflowError::Ensemble(format!(
                "step called in phase {:?}",
                self.phase
            )));
        }

        let live_before: Vec<usize> = (0..self.layout.cfd_n_envs)
            .filter(|&i| self.status.is_live(i))
            .collect();

        self.gather_actions(actions)?;
        self.cfd_actions = self
            .actions
            .distribute(&self.store, &self.status, self.agent_actions.view())?;

        self.fetch_observations()?;
        self.agent_rewards = self.rewards.compute(self.cfd_rewards.view(), &self.status);
        self.status.get_status(&self.store, &self.config.poll)?;

        self.episode_step += 1;
        self.global_step += 1;
        let truncate = self.episode_step >= self.config.steps_per_episode;

        self.dump_step(&live_before, false)?;

        // Phase one: outcome of every agent active at the start of the step
        let mut result = MultiAgentStepResult::default();
        let mut done: HashSet<AgentId> = HashSet::new();
        for &agent in &self.roster {
            let instance = self.layout.instance_of(agent);
            let idx = agent as usize;
            let terminated = !self.status.is_live(instance);
            let reward = self.agent_rewards.blended[idx];
            self.episode_returns[idx] += reward;

            let mut info = self
                .base_info(agent)
                .with_extra("local_reward", self.agent_rewards.local[idx])
                .with_extra("global_reward", self.agent_rewards.global[instance]);
            if terminated || truncate {
                done.insert(agent);
                info = info.with_episode_stats(self.episode_returns[idx], self.episode_step);
            }

            result.observations.insert(agent, self.observation(agent));
            result.rewards.insert(agent, reward);
            result.terminated.insert(agent, terminated);
            result.truncated.insert(agent, truncate && !terminated);
            result.infos.insert(agent, info);
        }

        // Phase two: the roster is rebuilt from the agents that are not done
        self.roster = self
            .roster
            .iter()
            .copied()
            .filter(|agent| !done.contains(agent))
            .collect();

        tracing::debug!(
            episode = self.episode,
            step = self.episode_step,
            active = self.roster.len(),
            done = done.len(),
            "environment step"
        );
        if self.roster.is_empty() {
            self.phase = EnvPhase::EpisodeDone;
            let mean_return = self.episode_returns.mean().unwrap_or(0.0);
            tracing::info!(
                episode = self.episode,
                length = self.episode_step,
                mean_return,
                "episode finished"
            );
        }
        Ok(result)
    }

    fn close(&mut self) -> Result<()> {
        tracing::info!(global_step = self.global_step, "closing environment");
        self.roster.clear();
        self.stop_ensemble()?;
        std::thread::sleep(self.config.teardown_grace());
        self.phase = EnvPhase::EpisodeDone;
        Ok(())
    }
}
