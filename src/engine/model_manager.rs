use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use ndarray::Array2;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use super::durable;
use super::sample_store::Sample;
use super::FEATURE_WIDTH;
use crate::error::{PredictorError, Result};
use crate::lln::activation::Activation;
use crate::lln::loss::Mse;
use crate::lln::neural_network::{EpochLogs, FitOptions, Sequential};
use crate::lln::optimizer::Adam;
use crate::settings::TrainingSettings;

/// Outcome of one retrain.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub history: Vec<EpochLogs>,
}

/// Owns the single live model. Predictions read an `Arc` snapshot; a retrain fits a copy,
/// persisting it after every epoch, and swaps it in once the fit is done.
pub struct ModelManager {
    artifact_path: PathBuf,
    fit_options: FitOptions,
    learning_rate: f32,
    live: RwLock<Arc<Sequential>>,
    optimizer: Mutex<Adam>,
    rng: Mutex<StdRng>,
    version: AtomicU64,
}

impl ModelManager {
    /// Builds a freshly initialised 6 -> 128 -> 64 -> dropout(0.2) -> 32 -> 1 regressor.
    pub fn construct(artifact_path: impl Into<PathBuf>, settings: &TrainingSettings) -> Result<Self> {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let model = Sequential::builder(FEATURE_WIDTH)
            .dense(128, Activation::Relu)
            .dense(64, Activation::Relu)
            .dropout(0.2)?
            .dense(32, Activation::Relu)
            .dense(1, Activation::Linear)
            .build(&mut rng)?;
        debug!("Constructed model with {} parameters", model.size());

        Ok(Self {
            artifact_path: artifact_path.into(),
            fit_options: settings.fit_options(),
            learning_rate: settings.learning_rate,
            optimizer: Mutex::new(Adam::with_learning_rate(model.size(), settings.learning_rate)),
            live: RwLock::new(Arc::new(model)),
            rng: Mutex::new(rng),
            version: AtomicU64::new(0),
        })
    }

    /// Replaces the live model with the persisted artifact, if there is one. Returns whether
    /// an artifact was loaded.
    pub fn load_if_present(&self) -> Result<bool> {
        let Some(bytes) = durable::read_if_present(&self.artifact_path)? else {
            info!("No model artifact at {}, keeping the fresh model", self.artifact_path.display());
            return Ok(false);
        };

        let model: Sequential = serde_json::from_slice(&bytes)
            .map_err(|e| PredictorError::corrupt_model(&self.artifact_path, e))?;
        model
            .validate()
            .map_err(|e| PredictorError::corrupt_model(&self.artifact_path, e))?;

        if model.input_width() != FEATURE_WIDTH || model.output_width() != 1 {
            return Err(PredictorError::corrupt_model(
                &self.artifact_path,
                format!(
                    "expected {FEATURE_WIDTH} inputs and 1 output, found {} and {}",
                    model.input_width(),
                    model.output_width()
                ),
            ));
        }

        *self.optimizer.lock() = Adam::with_learning_rate(model.size(), self.learning_rate);
        *self.live.write() = Arc::new(model);
        info!("Loaded model artifact from {}", self.artifact_path.display());
        Ok(true)
    }

    /// Fits the model on the whole dataset. The artifact is rewritten after each epoch and
    /// the in-memory model is replaced only if every epoch succeeded.
    pub fn train(&self, samples: &[Sample]) -> Result<TrainingReport> {
        let (x, y) = build_matrices(samples)?;
        info!("Retraining on {} samples", samples.len());

        // The moments are only committed together with the candidate they were fitted on.
        let mut committed = self.optimizer.lock();
        let mut optimizer = committed.clone();
        let mut candidate = Sequential::clone(&self.snapshot());
        let mut rng = self.rng.lock();

        let history = candidate.fit(
            x.view(),
            y.view(),
            &self.fit_options,
            &Mse,
            &mut optimizer,
            &mut *rng,
            |model, logs| {
                info!(
                    "Epoch {}: loss = {}, val_loss = {}",
                    logs.epoch,
                    logs.loss,
                    logs.val_loss.map_or_else(|| "n/a".to_string(), |l| l.to_string())
                );
                self.persist(model)
            },
        )?;

        *committed = optimizer;
        *self.live.write() = Arc::new(candidate);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Model retrained, now at version {version}");

        Ok(TrainingReport {
            samples: samples.len(),
            history,
        })
    }

    /// Forward pass over one normalized feature vector. The output is still normalized.
    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != FEATURE_WIDTH {
            return Err(PredictorError::invalid_input(format!(
                "expected {FEATURE_WIDTH} features, got {}",
                features.len()
            )));
        }

        let row = Array2::from_shape_fn((1, FEATURE_WIDTH), |(_, j)| features[j] as f32);
        let output = self.snapshot().predict(row.view())?;
        Ok(output[[0, 0]] as f64)
    }

    /// Successful retrains so far in this process.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn snapshot(&self) -> Arc<Sequential> {
        Arc::clone(&self.live.read())
    }

    fn persist(&self, model: &Sequential) -> Result<()> {
        durable::write_json_atomically(&self.artifact_path, model)
    }
}

/// Stacks the samples into an `n x 6` input matrix and an `n x 1` label column.
fn build_matrices(samples: &[Sample]) -> Result<(Array2<f32>, Array2<f32>)> {
    if samples.is_empty() {
        return Err(crate::lln::error::NetworkError::EmptyDataset.into());
    }

    if let Some((index, sample)) = samples
        .iter()
        .enumerate()
        .find(|(_, s)| s.input_values.len() != FEATURE_WIDTH)
    {
        return Err(PredictorError::RaggedSample {
            index,
            got: sample.input_values.len(),
            expected: FEATURE_WIDTH,
        });
    }

    let x = Array2::from_shape_fn((samples.len(), FEATURE_WIDTH), |(i, j)| {
        samples[i].input_values[j] as f32
    });
    let y = Array2::from_shape_fn((samples.len(), 1), |(i, _)| samples[i].label as f32);
    Ok((x, y))
}
