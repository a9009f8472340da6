//! In-process stand-in for an ensemble of CFD solvers.
//!
//! Each instance runs on its own thread and speaks the same store protocol as
//! a real solver:
//!
//! 1. publish `time`, `step_type = INITIALIZED`, `state`, then `reward`;
//! 2. wait for `action`, consume it, advance one step;
//! 3. publish `time`, `step_type` (RUNNING, or ENDED after the last step),
//!    `state`, then `reward` and go back to 2 until ended or stopped.
//!
//! The reward is always written last, so once it has been consumed the status
//! key already describes the same step.
//!
//! The dynamics are a damped linear response to the actions plus noise.

use super::ProcessEnsemble;
use crate::config::EnvConfig;
use crate::reference::ReferenceProfile;
use crate::status::StepType;
use crate::store::{KeyRole, TensorKey, TensorStore};
use crate::{Result, SmartflowError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Behaviour of the synthetic solvers.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub marl_n_envs: usize,
    pub n_state: usize,
    pub n_action: usize,
    pub n_reward: usize,
    /// Steps after which a solver reports ENDED
    pub solver_steps: u64,
    /// Delay before a solver publishes its first status
    pub startup_delay: Duration,
    /// Simulated compute time per step
    pub step_delay: Duration,
    /// Wait between checks for a new action
    pub poll_interval: Duration,
    /// Relative noise level of published values
    pub noise: f32,
    /// Physical time advanced per step
    pub dt: f32,
    /// Flow each solver fluctuates around; instance `tag` follows
    /// `targets[tag % targets.len()]`
    pub targets: Vec<SolverTarget>,
    /// Base seed; instance `tag` uses `seed + tag`
    pub seed: u64,
}

impl SyntheticConfig {
    /// Match the sizes of an environment configuration.
    pub fn from_env(config: &EnvConfig) -> Self {
        let n_profile = config.n_profile();
        Self {
            marl_n_envs: config.marl_n_envs,
            n_state: config.n_state,
            n_action: config.n_action,
            n_reward: config.n_reward,
            solver_steps: config.steps_per_episode,
            startup_delay: Duration::from_millis(10),
            step_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            noise: 0.05,
            dt: 0.01,
            targets: vec![SolverTarget {
                tau_wall: 1.0,
                profile: (1..=n_profile).map(|k| k as f32).collect(),
            }],
            seed: config.seed,
        }
    }

    /// Every solver fluctuates around the same reference case.
    pub fn with_reference(self, reference: &ReferenceProfile) -> Self {
        self.with_references(std::slice::from_ref(reference))
    }

    /// Solver `tag` fluctuates around `references[tag]`, the case the
    /// environment scores that instance against.
    pub fn with_references(mut self, references: &[ReferenceProfile]) -> Self {
        if references.is_empty() {
            return self;
        }
        let n_profile = self.n_reward.saturating_sub(3);
        self.targets = references
            .iter()
            .map(|reference| SolverTarget::from_reference(reference, n_profile))
            .collect();
        self
    }

    fn target(&self, tag: usize) -> SolverTarget {
        match self.targets.len() {
            0 => SolverTarget {
                tau_wall: 1.0,
                profile: vec![1.0; self.n_reward.saturating_sub(3)],
            },
            n => self.targets[tag % n].clone(),
        }
    }

    pub fn solver_steps(mut self, steps: u64) -> Self {
        self.solver_steps = steps;
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn noise(mut self, noise: f32) -> Self {
        self.noise = noise;
        self
    }
}

/// Wall shear stress and velocity profile a solver fluctuates around.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverTarget {
    pub tau_wall: f32,
    pub profile: Vec<f32>,
}

impl SolverTarget {
    /// Reference velocities resampled to `n_profile` points, repeating the
    /// outermost value when the reference is shorter.
    fn from_reference(reference: &ReferenceProfile, n_profile: usize) -> Self {
        let last = reference.u.last().copied().unwrap_or(0.0);
        Self {
            tau_wall: reference.tau_wall,
            profile: (0..n_profile)
                .map(|k| reference.u.get(k).copied().unwrap_or(last))
                .collect(),
        }
    }
}

/// Ensemble of synthetic solver threads sharing one tensor store.
pub struct SyntheticEnsemble<S> {
    store: S,
    config: SyntheticConfig,
    tags: Vec<usize>,
    handles: Vec<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl<S> SyntheticEnsemble<S>
where
    S: TensorStore + Clone + Send + 'static,
{
    pub fn new(store: S, config: SyntheticConfig) -> Self {
        Self {
            store,
            config,
            tags: Vec::new(),
            handles: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Tags of the solvers whose thread has not returned yet.
    pub fn live_tags(&self) -> Vec<usize> {
        self.tags
            .iter()
            .zip(&self.handles)
            .filter(|(_, h)| !h.is_finished())
            .map(|(&t, _)| t)
            .collect()
    }
}

impl<S> ProcessEnsemble for SyntheticEnsemble<S>
where
    S: TensorStore + Clone + Send + 'static,
{
    fn start(&mut self, tags: &[usize]) -> Result<()> {
        if self.is_running() {
            return Err(SmartflowError::Ensemble(
                "ensemble already started; stop it first".to_string(),
            ));
        }
        self.stop_flag = Arc::new(AtomicBool::new(false));
        for &tag in tags {
            let solver = Solver::new(tag, self.config.clone());
            let store = self.store.clone();
            let stop = Arc::clone(&self.stop_flag);
            let handle = thread::Builder::new()
                .name(format!("synthetic-solver-{tag}"))
                .spawn(move || solver.run(&store, &stop))?;
            self.handles.push(handle);
            self.tags.push(tag);
        }
        tracing::debug!(instances = tags.len(), "synthetic ensemble started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        let mut panicked = Vec::new();
        for (tag, handle) in self.tags.iter().zip(self.handles.drain(..)) {
            if handle.join().is_err() {
                panicked.push(*tag);
            }
        }
        for &tag in &self.tags {
            for role in KeyRole::ALL {
                self.store
                    .delete_tensor(&TensorKey::new(tag, role).to_string())?;
            }
        }
        tracing::debug!(instances = self.tags.len(), "synthetic ensemble stopped");
        self.tags.clear();

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(SmartflowError::Ensemble(format!(
                "solver threads {panicked:?} panicked"
            )))
        }
    }

    fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

impl<S> Drop for SyntheticEnsemble<S> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// One synthetic solver instance.
struct Solver {
    tag: usize,
    config: SyntheticConfig,
    target: SolverTarget,
    rng: StdRng,
    state: Vec<f32>,
    last_action: Vec<f32>,
    time: f32,
    step: u64,
}

impl Solver {
    fn new(tag: usize, config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(tag as u64));
        let state = vec![0.0; config.n_state];
        let last_action = vec![0.0; config.marl_n_envs * config.n_action];
        let target = config.target(tag);
        Self {
            tag,
            config,
            target,
            rng,
            state,
            last_action,
            time: 0.0,
            step: 0,
        }
    }

    fn key(&self, role: KeyRole) -> String {
        TensorKey::new(self.tag, role).to_string()
    }

    fn run<S: TensorStore>(mut self, store: &S, stop: &AtomicBool) {
        thread::sleep(self.config.startup_delay);
        if let Err(e) = self.publish(store, StepType::Initialized) {
            tracing::warn!(tag = self.tag, error = %e, "synthetic solver failed to start");
            return;
        }

        let action_key = self.key(KeyRole::Action);
        while !stop.load(Ordering::SeqCst) {
            match store.poll_tensor(&action_key, self.config.poll_interval, 1) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => break,
            }
            let Ok(action) = store.get_tensor(&action_key) else {
                continue;
            };
            if store.delete_tensor(&action_key).is_err() {
                break;
            }

            self.advance(&action);
            thread::sleep(self.config.step_delay);

            let ended = self.step >= self.config.solver_steps;
            let step_type = if ended {
                StepType::Ended
            } else {
                StepType::Running
            };
            if self.publish(store, step_type).is_err() || ended {
                break;
            }
        }
    }

    fn advance(&mut self, action: &[f32]) {
        self.step += 1;
        self.time += self.config.dt;
        if action.len() == self.last_action.len() {
            self.last_action.copy_from_slice(action);
        }

        let psenv = (self.config.n_state / self.config.marl_n_envs).max(1);
        let n_action = self.config.n_action;
        for k in 0..self.state.len() {
            let agent = (k / psenv).min(self.config.marl_n_envs - 1);
            let forcing = self.last_action[agent * n_action];
            let noise = self.noise();
            self.state[k] = 0.9 * self.state[k] + 0.1 * forcing + noise;
        }
    }

    /// Zero-mean gaussian sample scaled by the configured noise level.
    fn noise(&mut self) -> f32 {
        let z: f32 = self.rng.sample(StandardNormal);
        z * self.config.noise.max(0.0)
    }

    fn reward_row(&mut self) -> Vec<f32> {
        let (marl_n_envs, n_action, n_reward) =
            (self.config.marl_n_envs, self.config.n_action, self.config.n_reward);
        let tau_wall = self.target.tau_wall;
        let profile = self.target.profile.clone();
        let mut row = Vec::with_capacity(marl_n_envs * n_reward);
        for agent in 0..marl_n_envs {
            let forcing = self.last_action[agent * n_action];
            row.push(1.0 + self.noise());
            row.push(tau_wall * (1.0 + forcing + self.noise()));
            row.push(0.0);
            for &u in &profile {
                row.push(u * (1.0 + self.noise()));
            }
        }
        row
    }

    fn publish<S: TensorStore>(&mut self, store: &S, step_type: StepType) -> Result<()> {
        let reward = self.reward_row();
        store.put_tensor(&self.key(KeyRole::Time), &[self.time])?;
        store.put_tensor(&self.key(KeyRole::StepType), &[step_type.code() as f32])?;
        store.put_tensor(&self.key(KeyRole::State), &self.state)?;
        store.put_tensor(&self.key(KeyRole::Reward), &reward)?;
        Ok(())
    }
}
