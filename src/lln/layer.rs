use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::dense::Dense;
use super::dropout::Dropout;
use super::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Dense(Dense),
    Dropout(Dropout),
}

impl Layer {
    pub fn dense(input: usize, units: usize, activation: Activation) -> Self {
        Self::Dense(Dense::new(input, units, activation))
    }

    pub fn dropout(rate: f32) -> Result<Self> {
        Ok(Self::Dropout(Dropout::new(rate)?))
    }

    /// Amount of trainable parameters owned by this layer.
    pub fn size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.size(),
            Layer::Dropout(_) => 0,
        }
    }

    /// Width of the activations this layer emits given `input` wide activations.
    pub fn output_width(&self, input: usize) -> usize {
        match self {
            Layer::Dense(l) => l.units(),
            Layer::Dropout(_) => input,
        }
    }

    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        if let Layer::Dense(l) = self {
            l.init_params(params, rng);
        }
    }

    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.infer(params, x),
            Layer::Dropout(_) => Ok(x.to_owned()),
        }
    }

    pub fn forward<R: Rng>(
        &mut self,
        params: &[f32],
        x: Array2<f32>,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.forward(params, x),
            Layer::Dropout(l) => Ok(l.forward(x, rng)),
        }
    }

    pub fn backward(&self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.backward(params, grad, d),
            Layer::Dropout(l) => l.backward(d),
        }
    }
}
