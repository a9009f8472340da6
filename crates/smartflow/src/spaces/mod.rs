//! Observation and action spaces.
//!
//! Every agent of a CFD environment observes and acts on a fixed-length real
//! vector, so the only space needed is a bounded `Box`.

mod r#box;

pub use r#box::Box;

use rand::Rng;

/// A set of values an agent can observe or emit.
pub trait Space: Clone + Send + Sync {
    type Sample;

    /// Draw a value, e.g. for a random exploration policy.
    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample;

    /// Whether `value` has the right shape and lies inside the bounds.
    fn contains(&self, value: &Self::Sample) -> bool;

    fn shape(&self) -> &[usize];

    /// Flat length of one sample.
    fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }
}
