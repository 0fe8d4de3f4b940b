use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, Result};

/// Inverted dropout: zeroes each activation with probability `rate` while training and scales
/// the survivors by `1 / (1 - rate)`. Inference passes activations through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    rate: f32,

    #[serde(skip)]
    mask: Array2<f32>,
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self> {
        let dropout = Self {
            rate,
            mask: Array2::zeros((0, 0)),
        };
        dropout.validate()?;
        Ok(dropout)
    }

    #[cfg(test)]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.rate) {
            return Err(NetworkError::InvalidDropoutRate(self.rate));
        }
        Ok(())
    }

    pub fn forward<R: Rng>(&mut self, x: Array2<f32>, rng: &mut R) -> Array2<f32> {
        let keep = 1.0 - self.rate;
        self.mask = Array2::from_shape_fn(x.raw_dim(), |_| {
            if rng.random::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        });

        x * &self.mask
    }

    pub fn backward(&self, d: Array2<f32>) -> Result<Array2<f32>> {
        if d.dim() != self.mask.dim() {
            return Err(NetworkError::SizeMismatch {
                what: "dropout deltas",
                got: d.len(),
                expected: self.mask.len(),
            });
        }

        Ok(d * &self.mask)
    }
}
