//! Deterministic solver doubles for environment tests.
//!
//! `ScriptedStore` answers every action write synchronously with the next
//! step of a script, so the environment never has to wait on a thread.

#![allow(dead_code)]

use parking_lot::Mutex;
use smartflow::prelude::*;
use smartflow::store::{StoreError, StoreResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// One store operation as seen by the double.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Put(String),
    Get(String),
    Delete(String),
    Poll(String),
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Put(k) | Op::Get(k) | Op::Delete(k) | Op::Poll(k) => k,
        }
    }
}

/// What each instance reports.
#[derive(Clone, Debug)]
pub struct Script {
    pub n_state: usize,
    pub reward_len: usize,
    /// Status published at start; `None` publishes nothing
    pub initial: Vec<Option<i32>>,
    /// Status published after step `k` (1-based) is `statuses[i][k - 1]`;
    /// the last entry repeats, an empty list means RUNNING
    pub statuses: Vec<Vec<i32>>,
    /// Instances that never answer an action
    pub silent: HashSet<usize>,
    /// Reward row published by every instance
    pub reward_row: Vec<f32>,
}

impl Script {
    pub fn new(config: &EnvConfig) -> Self {
        let n = config.cfd_n_envs;
        Self {
            n_state: config.n_state,
            reward_len: config.marl_n_envs * config.n_reward,
            initial: vec![Some(StepType::Initialized.code()); n],
            statuses: vec![Vec::new(); n],
            silent: HashSet::new(),
            reward_row: vec![0.0; config.marl_n_envs * config.n_reward],
        }
    }

    /// State of `instance` after `step`: `instance * 100 + step * 10 + k`.
    pub fn state(&self, instance: usize, step: usize) -> Vec<f32> {
        (0..self.n_state)
            .map(|k| (instance * 100 + step * 10 + k) as f32)
            .collect()
    }

    fn status_after(&self, instance: usize, step: usize) -> i32 {
        let list = &self.statuses[instance];
        match list.get(step - 1).or(list.last()) {
            Some(&s) => s,
            None => StepType::Running.code(),
        }
    }
}

struct Inner {
    script: Script,
    steps: Vec<usize>,
    ops: Vec<Op>,
}

/// Tensor store whose solvers step in lockstep with action writes.
#[derive(Clone)]
pub struct ScriptedStore {
    tensors: InMemoryStore,
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedStore {
    pub fn new(script: Script) -> Self {
        let n = script.statuses.len();
        Self {
            tensors: InMemoryStore::new(),
            inner: Arc::new(Mutex::new(Inner {
                script,
                steps: vec![0; n],
                ops: Vec::new(),
            })),
        }
    }

    pub fn tensors(&self) -> &InMemoryStore {
        &self.tensors
    }

    pub fn ops(&self) -> Vec<Op> {
        self.inner.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().ops.clear();
    }

    /// Operations touching keys of `instance`.
    pub fn ops_for(&self, instance: usize) -> Vec<Op> {
        let prefix = format!("ensemble_{instance}.");
        self.ops()
            .into_iter()
            .filter(|op| op.key().starts_with(&prefix))
            .collect()
    }

    /// Steps answered by `instance` since its start.
    pub fn steps(&self, instance: usize) -> usize {
        self.inner.lock().steps[instance]
    }

    fn publish(&self, instance: usize, status: Option<i32>, state: Vec<f32>, reward: Vec<f32>) {
        let key = |role| TensorKey::new(instance, role).to_string();
        if let Some(status) = status {
            self.tensors
                .put_tensor(&key(KeyRole::StepType), &[status as f32])
                .unwrap();
        }
        self.tensors.put_tensor(&key(KeyRole::Time), &[0.5]).unwrap();
        self.tensors.put_tensor(&key(KeyRole::State), &state).unwrap();
        self.tensors.put_tensor(&key(KeyRole::Reward), &reward).unwrap();
    }

    /// Publish the first step of `instance`.
    pub fn start_instance(&self, instance: usize) {
        let (status, state, reward) = {
            let mut inner = self.inner.lock();
            inner.steps[instance] = 0;
            let script = &inner.script;
            (
                script.initial[instance],
                script.state(instance, 0),
                script.reward_row.clone(),
            )
        };
        if status.is_some() {
            self.publish(instance, status, state, reward);
        }
    }

    fn answer_action(&self, instance: usize) {
        let published = {
            let mut inner = self.inner.lock();
            if inner.script.silent.contains(&instance) {
                None
            } else {
                inner.steps[instance] += 1;
                let step = inner.steps[instance];
                let script = &inner.script;
                Some((
                    script.status_after(instance, step),
                    script.state(instance, step),
                    script.reward_row.clone(),
                ))
            }
        };
        if let Some((status, state, reward)) = published {
            self.tensors
                .delete_tensor(&TensorKey::new(instance, KeyRole::Action).to_string())
                .unwrap();
            self.publish(instance, Some(status), state, reward);
        }
    }

    fn record(&self, op: Op) {
        self.inner.lock().ops.push(op);
    }
}

impl TensorStore for ScriptedStore {
    fn put_tensor(&self, key: &str, data: &[f32]) -> StoreResult<()> {
        self.record(Op::Put(key.to_string()));
        self.tensors.put_tensor(key, data)?;
        match TensorKey::parse(key) {
            Some(TensorKey {
                instance,
                role: KeyRole::Action,
            }) => self.answer_action(instance),
            Some(_) => {}
            None => return Err(StoreError::Backend(format!("unexpected key {key}"))),
        }
        Ok(())
    }

    fn get_tensor(&self, key: &str) -> StoreResult<Vec<f32>> {
        self.record(Op::Get(key.to_string()));
        self.tensors.get_tensor(key)
    }

    fn delete_tensor(&self, key: &str) -> StoreResult<()> {
        self.record(Op::Delete(key.to_string()));
        self.tensors.delete_tensor(key)
    }

    fn tensor_exists(&self, key: &str) -> StoreResult<bool> {
        self.tensors.tensor_exists(key)
    }

    fn poll_tensor(&self, key: &str, interval: Duration, attempts: u32) -> StoreResult<bool> {
        self.record(Op::Poll(key.to_string()));
        self.tensors.poll_tensor(key, interval, attempts)
    }
}

/// Ensemble whose instances live inside a `ScriptedStore`.
pub struct ScriptedEnsemble {
    store: ScriptedStore,
    tags: Vec<usize>,
    pub starts: usize,
    pub stops: usize,
}

impl ScriptedEnsemble {
    pub fn new(store: ScriptedStore) -> Self {
        Self {
            store,
            tags: Vec::new(),
            starts: 0,
            stops: 0,
        }
    }
}

impl ProcessEnsemble for ScriptedEnsemble {
    fn start(&mut self, tags: &[usize]) -> smartflow::Result<()> {
        self.starts += 1;
        for &tag in tags {
            self.store.start_instance(tag);
        }
        self.tags = tags.to_vec();
        Ok(())
    }

    fn stop(&mut self) -> smartflow::Result<()> {
        if self.tags.is_empty() {
            return Ok(());
        }
        self.stops += 1;
        for &tag in &self.tags {
            for role in KeyRole::ALL {
                self.store
                    .tensors()
                    .delete_tensor(&TensorKey::new(tag, role).to_string())?;
            }
        }
        self.tags.clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// Two instances with three agents each, one state value per agent.
pub fn small_config() -> EnvConfig {
    let mut config = EnvConfig::default()
        .layout(2, 3)
        .sizes(6, 2, 1, 5)
        .steps_per_episode(10)
        .action_bounds(-0.3, 0.5)
        .poll(1, 3, 3)
        .teardown_grace_ms(0);
    config.reward.n_wall_points = 2;
    config
}

pub fn references(config: &EnvConfig) -> Vec<ReferenceProfile> {
    vec![ReferenceProfile::new(1.0, vec![0.5, 1.0], vec![1.0, 2.0]).unwrap(); config.cfd_n_envs]
}

pub type ScriptedEnv = CfdEnv<ScriptedStore, ScriptedEnsemble>;

pub fn scripted_env(config: EnvConfig, script: Script) -> (ScriptedEnv, ScriptedStore) {
    let store = ScriptedStore::new(script);
    let ensemble = ScriptedEnsemble::new(store.clone());
    let refs = references(&config);
    let env = CfdEnv::with_references(config, store.clone(), ensemble, refs).unwrap();
    (env, store)
}

/// The same action for every listed agent.
pub fn uniform_actions(agents: &[AgentId], value: f32) -> std::collections::HashMap<AgentId, ArrayD<f32>> {
    agents
        .iter()
        .map(|&a| (a, ArrayD::from_elem(IxDyn(&[1]), value)))
        .collect()
}
