use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Element-wise activation applied after a dense layer's affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Linear => x,
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
        }
    }

    /// Maps `z` through the activation.
    pub fn apply(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => z.clone(),
            _ => z.mapv(|v| self.f(v)),
        }
    }

    /// Multiplies the incoming deltas by the activation's derivative at `z`.
    pub fn backprop(&self, d: &mut Array2<f32>, z: &Array2<f32>) {
        if *self == Activation::Linear {
            return;
        }

        Zip::from(d).and(z).for_each(|d, &z| *d *= self.df(z));
    }
}
