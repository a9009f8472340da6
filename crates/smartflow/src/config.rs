//! Environment configuration.

use crate::{Result, SmartflowError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which case set the environment runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Train,
    Eval,
}

/// Per-mode settings: the cases to run and where trajectories go.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Case directory names under `case_root`; instance `i` runs `cases[i % len]`
    pub cases: Vec<String>,
    /// Directory for trajectory dumps
    pub trajectory_dir: PathBuf,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            cases: vec!["channel_re180".to_string()],
            trajectory_dir: PathBuf::from("trajectories"),
        }
    }
}

/// Polling budget for reads from the tensor store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Wait between two existence checks (milliseconds)
    pub interval_ms: u64,
    /// Checks per state/reward/time read
    pub attempts: u32,
    /// Checks per status key while the ensemble is starting up
    pub init_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            attempts: 100,
            init_attempts: 1000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Reward shaping parameters.
///
/// Each coefficient scales one error term; setting it to zero removes the term.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Weight of the global reward in the blend, in [0, 1]
    pub beta: f32,
    /// Velocity-profile error coefficient
    pub profile_coef: f32,
    /// Wall shear stress deviation coefficient
    pub wall_shear_coef: f32,
    /// Streamwise velocity deviation coefficient
    pub bulk_velocity_coef: f32,
    /// Target value of the streamwise velocity indicator
    pub target_bulk_velocity: f32,
    /// Constant added to both local and global rewards
    pub offset: f32,
    /// Number of near-wall profile points entering the profile error
    pub n_wall_points: usize,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            beta: 0.2,
            profile_coef: 1.0,
            wall_shear_coef: 1.0,
            bulk_velocity_coef: 0.0,
            target_bulk_velocity: 1.0,
            offset: 0.0,
            n_wall_points: 4,
        }
    }
}

/// Physical range the policy output [-1, 1] is mapped onto.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionBounds {
    pub lower: f32,
    pub upper: f32,
}

impl Default for ActionBounds {
    fn default() -> Self {
        Self {
            lower: -0.3,
            upper: 0.3,
        }
    }
}

/// Configuration for `CfdEnv`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    // Layout
    /// Number of CFD instances
    pub cfd_n_envs: usize,
    /// Pseudo-agents per CFD instance
    pub marl_n_envs: usize,
    /// State length published by one CFD instance
    pub n_state: usize,
    /// Observation length of one pseudo-agent
    pub n_state_marl: usize,
    /// Action components per pseudo-agent
    pub n_action: usize,
    /// Reward columns per pseudo-agent in the local reward tensor
    pub n_reward: usize,

    // Episode
    /// Steps after which every remaining agent is truncated
    pub steps_per_episode: u64,
    /// Active mode
    pub mode: RunMode,
    pub train: ModeConfig,
    pub eval: ModeConfig,
    /// Root directory holding one sub-directory per case
    pub case_root: PathBuf,
    /// Statistics file name inside a case directory
    pub stats_file: String,
    /// Profile file name inside a case directory
    pub profile_file: String,

    // Exchange
    pub poll: PollConfig,
    /// Read `ensemble_{i}.time` after each status refresh
    pub read_solver_time: bool,
    /// Grace period after stopping the ensemble in `close` (milliseconds)
    pub teardown_grace_ms: u64,

    pub reward: RewardConfig,
    pub action_bounds: ActionBounds,

    /// Append state/local reward/action rows to disk every step
    pub dump_trajectories: bool,

    // Random seed
    pub seed: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            cfd_n_envs: 1,
            marl_n_envs: 4,
            n_state: 8,
            n_state_marl: 2,
            n_action: 1,
            n_reward: 3 + 8,
            steps_per_episode: 100,
            mode: RunMode::Train,
            train: ModeConfig::default(),
            eval: ModeConfig {
                trajectory_dir: PathBuf::from("trajectories_eval"),
                ..ModeConfig::default()
            },
            case_root: PathBuf::from("cases"),
            stats_file: "stats.dat".to_string(),
            profile_file: "profile.dat".to_string(),
            poll: PollConfig::default(),
            read_solver_time: false,
            teardown_grace_ms: 2000,
            reward: RewardConfig::default(),
            action_bounds: ActionBounds::default(),
            dump_trajectories: false,
            seed: 42,
        }
    }
}

impl EnvConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SmartflowError::Config(e.to_string()))
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SmartflowError::Config(e.to_string()))
    }

    /// Set the ensemble layout.
    pub fn layout(mut self, cfd_n_envs: usize, marl_n_envs: usize) -> Self {
        self.cfd_n_envs = cfd_n_envs;
        self.marl_n_envs = marl_n_envs;
        self
    }

    /// Set state, observation, action and reward sizes.
    pub fn sizes(mut self, n_state: usize, n_state_marl: usize, n_action: usize, n_reward: usize) -> Self {
        self.n_state = n_state;
        self.n_state_marl = n_state_marl;
        self.n_action = n_action;
        self.n_reward = n_reward;
        self
    }

    pub fn steps_per_episode(mut self, steps: u64) -> Self {
        self.steps_per_episode = steps;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn reward(mut self, reward: RewardConfig) -> Self {
        self.reward = reward;
        self
    }

    pub fn action_bounds(mut self, lower: f32, upper: f32) -> Self {
        self.action_bounds = ActionBounds { lower, upper };
        self
    }

    pub fn poll(mut self, interval_ms: u64, attempts: u32, init_attempts: u32) -> Self {
        self.poll = PollConfig {
            interval_ms,
            attempts,
            init_attempts,
        };
        self
    }

    /// Enable trajectory dumps into `dir` for the active mode.
    pub fn dump_trajectories_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_trajectories = true;
        match self.mode {
            RunMode::Train => self.train.trajectory_dir = dir.into(),
            RunMode::Eval => self.eval.trajectory_dir = dir.into(),
        }
        self
    }

    pub fn teardown_grace_ms(mut self, ms: u64) -> Self {
        self.teardown_grace_ms = ms;
        self
    }

    /// Settings of the active mode.
    pub fn mode_config(&self) -> &ModeConfig {
        match self.mode {
            RunMode::Train => &self.train,
            RunMode::Eval => &self.eval,
        }
    }

    /// Case name run by CFD instance `instance`.
    pub fn case_for(&self, instance: usize) -> &str {
        let cases = &self.mode_config().cases;
        &cases[instance % cases.len()]
    }

    /// Directory holding the reference files of `instance`.
    pub fn case_dir(&self, instance: usize) -> PathBuf {
        self.case_root.join(self.case_for(instance))
    }

    /// State slice length owned by one pseudo-agent.
    pub fn n_state_psenv(&self) -> usize {
        self.n_state / self.marl_n_envs
    }

    /// Number of profile samples in each agent's reward row.
    pub fn n_profile(&self) -> usize {
        self.n_reward.saturating_sub(3)
    }

    pub fn total_agents(&self) -> usize {
        self.cfd_n_envs * self.marl_n_envs
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Check every construction-time invariant.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SmartflowError::Config(msg));

        if self.cfd_n_envs == 0 || self.marl_n_envs == 0 {
            return fail("cfd_n_envs and marl_n_envs must be positive".to_string());
        }
        if self.n_state == 0 || self.n_state % self.marl_n_envs != 0 {
            return fail(format!(
                "n_state ({}) must be a positive multiple of marl_n_envs ({})",
                self.n_state, self.marl_n_envs
            ));
        }
        if self.n_state_marl == 0 || self.n_state_marl > self.n_state_psenv() {
            return fail(format!(
                "n_state_marl ({}) must be in 1..={} (neighbor padding is not supported)",
                self.n_state_marl,
                self.n_state_psenv()
            ));
        }
        if self.n_action == 0 {
            return fail("n_action must be positive".to_string());
        }
        if self.n_reward < 3 {
            return fail(format!("n_reward ({}) must be at least 3", self.n_reward));
        }
        if self.reward.n_wall_points > self.n_profile() {
            return fail(format!(
                "reward.n_wall_points ({}) exceeds the {} profile samples per agent",
                self.reward.n_wall_points,
                self.n_profile()
            ));
        }
        if !(0.0..=1.0).contains(&self.reward.beta) {
            return fail(format!("reward.beta ({}) must lie in [0, 1]", self.reward.beta));
        }
        if !(self.action_bounds.lower < self.action_bounds.upper) {
            return fail(format!(
                "action bounds [{}, {}] are empty",
                self.action_bounds.lower, self.action_bounds.upper
            ));
        }
        if self.steps_per_episode == 0 {
            return fail("steps_per_episode must be positive".to_string());
        }
        if self.poll.attempts == 0 || self.poll.init_attempts == 0 {
            return fail("poll attempts must be positive".to_string());
        }
        if self.mode_config().cases.is_empty() {
            return fail(format!("no cases configured for mode {:?}", self.mode));
        }
        Ok(())
    }
}
