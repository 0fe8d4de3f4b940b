use super::error::{NetworkError, Result};

pub trait Optimizer {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

/// Adam with bias correction folded into the step size.
#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-7;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    /// An `Adam` with the usual hyperparameters and the given learning rate.
    pub fn with_learning_rate(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, Self::BETA1, Self::BETA2, Self::EPSILON)
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.v.len() {
            return Err(NetworkError::SizeMismatch {
                what: "optimizer state",
                got: grad.len(),
                expected: self.v.len(),
            });
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_against_the_gradient_by_learning_rate() {
        let mut adam = Adam::with_learning_rate(2, 0.1);
        let mut params = [1.0, 1.0];
        adam.update_params(&[0.5, -2.0], &mut params).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-4);
        assert!((params[1] - 1.1).abs() < 1e-4);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut adam = Adam::with_learning_rate(2, 0.1);
        let mut params = [1.0, 1.0, 1.0];
        let err = adam.update_params(&[0.0; 3], &mut params).unwrap_err();
        assert!(matches!(err, NetworkError::SizeMismatch { .. }));
    }
}
