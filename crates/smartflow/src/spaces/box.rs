//! Continuous real-vector space

use super::Space;
use crate::{Result, SmartflowError};
use ndarray::{ArrayD, IxDyn, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Real-valued space with per-element bounds. Infinite bounds are allowed.
#[derive(Clone, Debug, PartialEq)]
pub struct Box {
    pub low: ArrayD<f32>,
    pub high: ArrayD<f32>,
    shape: Vec<usize>,
}

impl Box {
    /// Space with explicit element bounds.
    ///
    /// `low` and `high` must have the same shape and `low <= high` everywhere.
    pub fn new(low: ArrayD<f32>, high: ArrayD<f32>) -> Result<Self> {
        if low.shape() != high.shape() {
            return Err(SmartflowError::ShapeMismatch {
                what: "box bounds".to_string(),
                expected: low.shape().to_vec(),
                actual: high.shape().to_vec(),
            });
        }
        if !Zip::from(&low).and(&high).all(|&l, &h| l <= h) {
            return Err(SmartflowError::Config(
                "box lower bound exceeds upper bound".to_string(),
            ));
        }
        Ok(Self::from_bounds(low, high))
    }

    /// Same bounds for every element.
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        Self::from_bounds(
            ArrayD::from_elem(IxDyn(shape), low),
            ArrayD::from_elem(IxDyn(shape), high),
        )
    }

    /// `(-inf, inf)` for every element, used for raw solver observations.
    pub fn unbounded(shape: &[usize]) -> Self {
        Self::uniform(shape, f32::NEG_INFINITY, f32::INFINITY)
    }

    /// `[-1, 1]` for every element, the range policies act in.
    pub fn symmetric(shape: &[usize]) -> Self {
        Self::uniform(shape, -1.0, 1.0)
    }

    fn from_bounds(low: ArrayD<f32>, high: ArrayD<f32>) -> Self {
        let shape = low.shape().to_vec();
        Self { low, high, shape }
    }

    pub fn is_bounded(&self) -> bool {
        Zip::from(&self.low)
            .and(&self.high)
            .all(|&l, &h| l.is_finite() && h.is_finite())
    }
}

impl Space for Box {
    type Sample = ArrayD<f32>;

    /// Uniform within finite bounds; standard normal, clamped to the bounds,
    /// where either side is infinite.
    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample {
        Zip::from(&self.low).and(&self.high).map_collect(|&l, &h| {
            if l.is_finite() && h.is_finite() {
                Uniform::new_inclusive(l, h).sample(rng)
            } else {
                let z: f32 = StandardNormal.sample(rng);
                z.clamp(l, h)
            }
        })
    }

    fn contains(&self, value: &Self::Sample) -> bool {
        value.shape() == self.shape.as_slice()
            && Zip::from(value)
                .and(&self.low)
                .and(&self.high)
                .all(|&v, &l, &h| l <= v && v <= h)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }
}
