// src/lln/neural_network.rs

use std::ops::Range;

use ndarray::{Array2, ArrayView2, Axis};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::error::{NetworkError, Result};
use super::layer::Layer;
use super::loss::LossFn;
use super::optimizer::Optimizer;

/// Options for `Sequential::fit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of rows, taken from the tail, held out for validation.
    pub validation_split: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
        }
    }
}

/// What a finished epoch reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochLogs {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss over the epoch's batches, weighted by batch rows.
    pub loss: f32,
    /// Loss over the held-out rows, `None` when the split holds out nothing.
    pub val_loss: Option<f32>,
}

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers. All parameters live in one flat buffer that each
/// layer slices into, in layer order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequential {
    input_width: usize,
    layers: Vec<Layer>,
    params: Vec<f32>,
}

impl Sequential {
    /// Starts describing a model fed with `input_width` wide rows.
    pub fn builder(input_width: usize) -> SequentialBuilder {
        SequentialBuilder {
            input_width,
            width: input_width,
            layers: Vec::new(),
        }
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.layers
            .iter()
            .fold(self.input_width, |width, layer| layer.output_width(width))
    }

    /// Total amount of trainable parameters.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    #[cfg(test)]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[cfg(test)]
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Checks that the layers chain together and that the parameter buffer fits them.
    /// Deserialized models must pass this before being used.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NetworkError::NoLayers);
        }

        let mut width = self.input_width;
        for layer in &self.layers {
            match layer {
                Layer::Dense(dense) if dense.input() != width => {
                    return Err(NetworkError::SizeMismatch {
                        what: "layer chaining",
                        got: dense.input(),
                        expected: width,
                    });
                }
                Layer::Dropout(dropout) => dropout.validate()?,
                _ => {}
            }
            width = layer.output_width(width);
        }

        if self.params.len() != self.size() {
            return Err(NetworkError::SizeMismatch {
                what: "parameter buffer",
                got: self.params.len(),
                expected: self.size(),
            });
        }

        Ok(())
    }

    /// Inference forward pass, dropout disabled.
    pub fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let ranges = self.param_ranges();
        let mut a = x.to_owned();
        for (layer, range) in self.layers.iter().zip(ranges) {
            a = layer.infer(&self.params[range], a.view())?;
        }
        Ok(a)
    }

    /// Loss of the inference pass over `x` against `y`.
    pub fn evaluate<L: LossFn>(&self, x: ArrayView2<f32>, y: ArrayView2<f32>, loss_fn: &L) -> Result<f32> {
        let y_pred = self.predict(x)?;
        check_rows(&y_pred.view(), &y)?;
        Ok(loss_fn.loss(y_pred.view(), y))
    }

    /// One forward/backward pass over a batch followed by an optimizer step. Returns the batch
    /// loss measured before the step.
    pub fn train_batch<L, O, R>(
        &mut self,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        loss_fn: &L,
        optimizer: &mut O,
        rng: &mut R,
    ) -> Result<f32>
    where
        L: LossFn,
        O: Optimizer,
        R: Rng,
    {
        let ranges = self.param_ranges();

        let mut a = x.to_owned();
        for (layer, range) in self.layers.iter_mut().zip(&ranges) {
            a = layer.forward(&self.params[range.clone()], a, rng)?;
        }
        check_rows(&a.view(), &y)?;

        let loss = loss_fn.loss(a.view(), y);
        let mut d = loss_fn.loss_prime(a.view(), y);

        let mut grad = vec![0.0; self.params.len()];
        for (layer, range) in self.layers.iter().zip(&ranges).rev() {
            d = layer.backward(&self.params[range.clone()], &mut grad[range.clone()], d)?;
        }

        optimizer.update_params(&grad, &mut self.params)?;
        Ok(loss)
    }

    /// Trains over `x`/`y` for `options.epochs` epochs. The last `validation_split` fraction of
    /// the rows is held out; the rest is shuffled every epoch and split in batches.
    /// `on_epoch_end` runs after every epoch with the model as it stands, an error from it
    /// stops the fit.
    pub fn fit<L, O, R, F, E>(
        &mut self,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        options: &FitOptions,
        loss_fn: &L,
        optimizer: &mut O,
        rng: &mut R,
        mut on_epoch_end: F,
    ) -> std::result::Result<Vec<EpochLogs>, E>
    where
        L: LossFn,
        O: Optimizer,
        R: Rng,
        F: FnMut(&Sequential, &EpochLogs) -> std::result::Result<(), E>,
        E: From<NetworkError>,
    {
        let rows = x.nrows();
        if rows == 0 {
            return Err(NetworkError::EmptyDataset.into());
        }
        check_rows(&x, &y)?;

        let split = ((rows as f64) * (1.0 - options.validation_split)).floor() as usize;
        if split == 0 {
            return Err(NetworkError::NoTrainingRows {
                rows,
                split: options.validation_split,
            }
            .into());
        }

        let (x_train, x_val) = x.split_at(Axis(0), split);
        let (y_train, y_val) = y.split_at(Axis(0), split);

        let batch_size = options.batch_size.max(1);
        let mut order: Vec<usize> = (0..split).collect();
        let mut history = Vec::with_capacity(options.epochs);

        for epoch in 0..options.epochs {
            order.shuffle(rng);

            let mut total = 0.0;
            for batch in order.chunks(batch_size) {
                let xb = x_train.select(Axis(0), batch);
                let yb = y_train.select(Axis(0), batch);
                total += self.train_batch(xb.view(), yb.view(), loss_fn, optimizer, rng)? * batch.len() as f32;
            }

            let val_loss = if x_val.nrows() > 0 {
                Some(self.evaluate(x_val, y_val, loss_fn)?)
            } else {
                None
            };

            let logs = EpochLogs {
                epoch: epoch + 1,
                loss: total / split as f32,
                val_loss,
            };
            on_epoch_end(&*self, &logs)?;
            history.push(logs);
        }

        Ok(history)
    }

    fn param_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.layers
            .iter()
            .map(|layer| {
                let range = start..start + layer.size();
                start = range.end;
                range
            })
            .collect()
    }
}

fn check_rows(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<()> {
    if a.nrows() != b.nrows() {
        return Err(NetworkError::SizeMismatch {
            what: "rows",
            got: b.nrows(),
            expected: a.nrows(),
        });
    }
    Ok(())
}

/// Collects layers, checking as it goes that each one fits the previous output width.
pub struct SequentialBuilder {
    input_width: usize,
    width: usize,
    layers: Vec<Layer>,
}

impl SequentialBuilder {
    pub fn dense(mut self, units: usize, activation: Activation) -> Self {
        self.layers.push(Layer::dense(self.width, units, activation));
        self.width = units;
        self
    }

    pub fn dropout(mut self, rate: f32) -> Result<Self> {
        self.layers.push(Layer::dropout(rate)?);
        Ok(self)
    }

    /// Allocates the parameter buffer and initialises every layer's slice of it.
    pub fn build<R: Rng>(self, rng: &mut R) -> Result<Sequential> {
        let mut model = Sequential {
            input_width: self.input_width,
            layers: self.layers,
            params: Vec::new(),
        };
        model.params = vec![0.0; model.size()];

        let ranges = model.param_ranges();
        for (layer, range) in model.layers.iter().zip(ranges) {
            layer.init_params(&mut model.params[range], rng);
        }

        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lln::loss::Mse;
    use crate::lln::optimizer::Adam;
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    fn small_model(rng: &mut StdRng) -> Sequential {
        Sequential::builder(2)
            .dense(8, Activation::Relu)
            .dropout(0.1)
            .unwrap()
            .dense(1, Activation::Linear)
            .build(rng)
            .unwrap()
    }

    #[test]
    fn builder_chains_widths_and_sizes_params() {
        let model = small_model(&mut StdRng::seed_from_u64(1));
        assert_eq!(model.input_width(), 2);
        assert_eq!(model.output_width(), 1);
        assert_eq!(model.size(), (2 + 1) * 8 + (8 + 1));
        assert_eq!(model.params().len(), model.size());
        assert_eq!(model.layers().len(), 3);
    }

    #[test]
    fn predict_is_deterministic_and_shaped() {
        let model = small_model(&mut StdRng::seed_from_u64(1));
        let x = array![[0.1, 0.9], [0.5, 0.5], [1.0, 0.0]];
        let a = model.predict(x.view()).unwrap();
        let b = model.predict(x.view()).unwrap();
        assert_eq!(a.dim(), (3, 1));
        assert_eq!(a, b);
    }

    #[test]
    fn fit_reduces_loss_on_a_linear_target() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut model = small_model(&mut rng);
        let mut adam = Adam::with_learning_rate(model.size(), 0.01);

        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * 7 + j * 3) % 10) as f32 / 10.0);
        let y = Array2::from_shape_fn((40, 1), |(i, _)| x[[i, 0]] * 0.5 + x[[i, 1]] * 0.25);

        let before = model.evaluate(x.view(), y.view(), &Mse).unwrap();
        let options = FitOptions {
            epochs: 200,
            batch_size: 8,
            validation_split: 0.0,
        };
        let history = model
            .fit(x.view(), y.view(), &options, &Mse, &mut adam, &mut rng, |_, _| {
                Ok::<(), NetworkError>(())
            })
            .unwrap();
        let after = model.evaluate(x.view(), y.view(), &Mse).unwrap();

        assert_eq!(history.len(), 200);
        assert!(history.iter().all(|logs| logs.val_loss.is_none()));
        assert!(after < before, "loss went from {before} to {after}");
    }

    #[test]
    fn fit_holds_out_the_tail_and_reports_every_epoch() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = small_model(&mut rng);
        let mut adam = Adam::with_learning_rate(model.size(), 0.001);
        let x = Array2::from_elem((11, 2), 0.5);
        let y = Array2::from_elem((11, 1), 1.0);

        let mut seen = Vec::new();
        let options = FitOptions {
            epochs: 3,
            ..FitOptions::default()
        };
        model
            .fit(x.view(), y.view(), &options, &Mse, &mut adam, &mut rng, |_, logs| {
                seen.push(logs.epoch);
                Ok::<(), NetworkError>(())
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn fit_stops_when_the_callback_fails() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = small_model(&mut rng);
        let mut adam = Adam::with_learning_rate(model.size(), 0.001);
        let x = Array2::from_elem((4, 2), 0.5);
        let y = Array2::from_elem((4, 1), 1.0);

        let mut calls = 0;
        let err = model
            .fit(x.view(), y.view(), &FitOptions::default(), &Mse, &mut adam, &mut rng, |_, _| {
                calls += 1;
                Err(NetworkError::NoLayers)
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, NetworkError::NoLayers));
    }

    #[test]
    fn fit_rejects_empty_and_unsplittable_data() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = small_model(&mut rng);
        let mut adam = Adam::with_learning_rate(model.size(), 0.001);
        let noop = |_: &Sequential, _: &EpochLogs| Ok::<(), NetworkError>(());

        let empty_x = Array2::<f32>::zeros((0, 2));
        let empty_y = Array2::<f32>::zeros((0, 1));
        let err = model
            .fit(empty_x.view(), empty_y.view(), &FitOptions::default(), &Mse, &mut adam, &mut rng, noop)
            .unwrap_err();
        assert!(matches!(err, NetworkError::EmptyDataset));

        let one_x = Array2::<f32>::zeros((1, 2));
        let one_y = Array2::<f32>::zeros((1, 1));
        let err = model
            .fit(one_x.view(), one_y.view(), &FitOptions::default(), &Mse, &mut adam, &mut rng, noop)
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoTrainingRows { rows: 1, .. }));
    }

    #[test]
    fn serialized_model_predicts_identically() {
        let model = small_model(&mut StdRng::seed_from_u64(9));
        let json = serde_json::to_string(&model).unwrap();
        let restored: Sequential = serde_json::from_str(&json).unwrap();
        restored.validate().unwrap();

        let x = array![[0.3, 0.7]];
        assert_eq!(model.predict(x.view()).unwrap(), restored.predict(x.view()).unwrap());
    }

    #[test]
    fn validate_catches_truncated_params() {
        let model = small_model(&mut StdRng::seed_from_u64(9));
        let mut json: serde_json::Value = serde_json::to_value(&model).unwrap();
        json["params"].as_array_mut().unwrap().pop();
        let broken: Sequential = serde_json::from_value(json).unwrap();

        assert!(matches!(
            broken.validate(),
            Err(NetworkError::SizeMismatch { what: "parameter buffer", .. })
        ));
    }
}
