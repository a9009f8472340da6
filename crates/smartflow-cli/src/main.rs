//! smartflow CLI
//!
//! Command-line driver for CFD multi-agent environments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use smartflow::log::EpisodeSummary;
use smartflow::prelude::*;

#[derive(Parser)]
#[command(name = "smartflow")]
#[command(version, about = "smartflow - multi-agent RL on CFD solver ensembles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Train,
    Eval,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Train => RunMode::Train,
            Mode::Eval => RunMode::Eval,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Roll out a random policy against synthetic solvers
    Run {
        /// Environment configuration (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Number of episodes
        #[arg(long, default_value = "1")]
        episodes: usize,

        /// Seed for the policy and the solvers (overrides the config)
        #[arg(long)]
        seed: Option<u64>,

        /// Steps after which the synthetic solvers report the end of their run
        #[arg(long)]
        solver_steps: Option<u64>,

        /// Case set to run (overrides the config)
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Environment configuration (JSON)
        file: PathBuf,
    },

    /// Print the tensor store keys used by one CFD instance
    Keys {
        /// Instance index
        #[arg(long, default_value = "0")]
        instance: usize,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            episodes,
            seed,
            solver_steps,
            mode,
        } => {
            let mut env_config = load_config(&config)?;
            if let Some(seed) = seed {
                env_config.seed = seed;
            }
            if let Some(mode) = mode {
                env_config = env_config.mode(mode.into());
            }
            run(env_config, episodes, solver_steps)?;
        }
        Commands::CheckConfig { file } => {
            let config = load_config(&file)?;
            print_summary(&config);
        }
        Commands::Keys { instance } => {
            for role in KeyRole::ALL {
                println!("{}", TensorKey::new(instance, role));
            }
        }
    }

    Ok(())
}

/// Load and validate a configuration. A relative `case_root` is taken
/// relative to the directory of the file.
fn load_config(path: &Path) -> Result<EnvConfig> {
    let mut config = EnvConfig::from_json_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    if config.case_root.is_relative() {
        if let Some(dir) = path.parent() {
            config.case_root = dir.join(&config.case_root);
        }
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn print_summary(config: &EnvConfig) {
    println!("Configuration OK");
    println!(
        "  instances: {} x {} agents = {} agents",
        config.cfd_n_envs,
        config.marl_n_envs,
        config.total_agents()
    );
    println!(
        "  state: {} per instance, {} per agent",
        config.n_state, config.n_state_marl
    );
    println!(
        "  action: {} per agent in [{}, {}]",
        config.n_action, config.action_bounds.lower, config.action_bounds.upper
    );
    println!("  reward: {} per agent, beta = {}", config.n_reward, config.reward.beta);
    println!("  steps per episode: {}", config.steps_per_episode);
    for instance in 0..config.cfd_n_envs {
        println!("  instance {}: {}", instance, config.case_dir(instance).display());
    }
}

fn run(config: EnvConfig, episodes: usize, solver_steps: Option<u64>) -> Result<()> {
    tracing::info!(
        instances = config.cfd_n_envs,
        agents = config.total_agents(),
        episodes,
        seed = config.seed,
        "Starting rollout (random policy)"
    );

    let references = ReferenceProfile::load_for_ensemble(&config)?;
    let mut solver = SyntheticConfig::from_env(&config).with_references(&references);
    if let Some(steps) = solver_steps {
        solver = solver.solver_steps(steps);
    }

    let store = InMemoryStore::new();
    let ensemble = SyntheticEnsemble::new(store.clone(), solver);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut env = CfdEnv::with_references(config, store, ensemble, references)?;
    let logger = ConsoleLogger::new();

    for _ in 0..episodes {
        let (mut observations, _) = env.reset()?;
        while !env.is_done() {
            let actions: HashMap<AgentId, ArrayD<f32>> = observations
                .keys()
                .map(|&agent| (agent, env.action_space(agent).sample(&mut rng)))
                .collect();
            let result = env.step(&actions)?;
            observations = result.observations;
        }

        let summary = EpisodeSummary::from_returns(
            env.episode(),
            env.episode_step(),
            env.global_step(),
            env.episode_returns().view(),
        );
        logger.log_episode(&summary);
    }

    env.close()?;
    logger.close();
    tracing::info!(global_step = env.global_step(), "Rollout complete");
    Ok(())
}
