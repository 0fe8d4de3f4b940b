use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::error::{NetworkError, Result};

/// A fully connected layer. Its parameters live outside of it, in the owning model's flat
/// buffer: `input * units` row-major weights followed by `units` biases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    input: usize,
    units: usize,
    activation: Activation,

    // Forward metadata
    #[serde(skip)]
    x: Array2<f32>,
    #[serde(skip)]
    z: Array2<f32>,
}

impl Dense {
    pub fn new(input: usize, units: usize, activation: Activation) -> Self {
        Self {
            input,
            units,
            activation,
            x: Array2::zeros((0, input)),
            z: Array2::zeros((0, units)),
        }
    }

    pub fn input(&self) -> usize {
        self.input
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.input + 1) * self.units
    }

    /// Glorot-uniform weights and zero biases, written into `params`.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        let limit = (6.0 / (self.input + self.units) as f32).sqrt();
        let (weights, biases) = params.split_at_mut(self.input * self.units);

        weights
            .iter_mut()
            .for_each(|w| *w = rng.random_range(-limit..=limit));
        biases.iter_mut().for_each(|b| *b = 0.0);
    }

    /// Inference pass, nothing is cached.
    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.affine(params, x)?;
        Ok(self.activation.apply(&z))
    }

    /// Training pass, keeps what `backward` needs.
    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        let z = self.affine(params, x.view())?;
        let a = self.activation.apply(&z);

        self.x = x;
        self.z = z;
        Ok(a)
    }

    /// Writes this layer's gradient into `grad` and returns the deltas for the previous layer.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(NetworkError::SizeMismatch {
                what: "dense deltas",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        self.activation.backprop(&mut d, &self.z);

        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.assign(&self.x.t().dot(&d));
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn affine(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.input {
            return Err(NetworkError::SizeMismatch {
                what: "dense input columns",
                got: x.ncols(),
                expected: self.input,
            });
        }

        let (w, b) = self.view_params(params)?;
        Ok(x.dot(&w) + &b)
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;
        let (w_raw, b_raw) = params.split_at(self.input * self.units);
        let weights = ArrayView2::from_shape((self.input, self.units), w_raw)?;
        let biases = ArrayView1::from_shape(self.units, b_raw)?;
        Ok((weights, biases))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;
        let (dw_raw, db_raw) = grad.split_at_mut(self.input * self.units);
        let dw = ArrayViewMut2::from_shape((self.input, self.units), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.units, db_raw)?;
        Ok((dw, db))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size() {
            return Err(NetworkError::SizeMismatch {
                what,
                got,
                expected: self.size(),
            });
        }
        Ok(())
    }
}
