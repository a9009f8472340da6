//! Lifecycle of the external solver processes.
//!
//! The environment only needs to start a set of tagged solver instances
//! without waiting for them, stop them again, and know whether any are up.
//! Everything else about the solvers goes through the tensor store.

mod synthetic;

pub use synthetic::{SolverTarget, SyntheticConfig, SyntheticEnsemble};

use crate::Result;

/// Starts and stops a group of external solver instances.
pub trait ProcessEnsemble {
    /// Launch one solver per tag.
    ///
    /// Must return as soon as the launch is issued; readiness is observed
    /// through the solvers' status tensors.
    fn start(&mut self, tags: &[usize]) -> Result<()>;

    /// Stop every solver still running and retire their store entries.
    ///
    /// Calling it with nothing running is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Whether a started ensemble has not been stopped yet.
    fn is_running(&self) -> bool;
}

impl<P: ProcessEnsemble + ?Sized> ProcessEnsemble for std::boxed::Box<P> {
    fn start(&mut self, tags: &[usize]) -> Result<()> {
        (**self).start(tags)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}
