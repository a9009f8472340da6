//! Mapping between global agent ids and (CFD instance, pseudo-agent) pairs.

use crate::env::AgentId;
use std::ops::Range;

/// Ensemble layout: `cfd_n_envs` instances with `marl_n_envs` agents each.
///
/// Agent `(i, j)` has the global id `i * marl_n_envs + j`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentLayout {
    pub cfd_n_envs: usize,
    pub marl_n_envs: usize,
}

impl AgentLayout {
    pub fn new(cfd_n_envs: usize, marl_n_envs: usize) -> Self {
        Self {
            cfd_n_envs,
            marl_n_envs,
        }
    }

    pub fn total_agents(&self) -> usize {
        self.cfd_n_envs * self.marl_n_envs
    }

    pub fn agent_id(&self, instance: usize, local: usize) -> AgentId {
        debug_assert!(instance < self.cfd_n_envs && local < self.marl_n_envs);
        (instance * self.marl_n_envs + local) as AgentId
    }

    /// Split a global id into `(instance, local)`.
    pub fn split(&self, agent: AgentId) -> (usize, usize) {
        let index = agent as usize;
        (index / self.marl_n_envs, index % self.marl_n_envs)
    }

    pub fn instance_of(&self, agent: AgentId) -> usize {
        agent as usize / self.marl_n_envs
    }

    /// Global indices owned by one instance.
    pub fn agents_of(&self, instance: usize) -> Range<usize> {
        instance * self.marl_n_envs..(instance + 1) * self.marl_n_envs
    }

    /// Every agent id in ascending order.
    pub fn all_agents(&self) -> Vec<AgentId> {
        (0..self.total_agents() as AgentId).collect()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        (agent as usize) < self.total_agents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let layout = AgentLayout::new(2, 3);
        assert_eq!(layout.total_agents(), 6);
        for i in 0..2 {
            for j in 0..3 {
                let id = layout.agent_id(i, j);
                assert_eq!(layout.split(id), (i, j));
                assert_eq!(layout.instance_of(id), i);
            }
        }
        assert_eq!(layout.agent_id(1, 0), 3);
    }

    #[test]
    fn test_agents_of_instance() {
        let layout = AgentLayout::new(3, 4);
        assert_eq!(layout.agents_of(0), 0..4);
        assert_eq!(layout.agents_of(2), 8..12);
        assert!(layout.contains(11));
        assert!(!layout.contains(12));
        assert_eq!(layout.all_agents().len(), 12);
    }
}
