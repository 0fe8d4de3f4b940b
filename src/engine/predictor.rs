use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use super::model_manager::{ModelManager, TrainingReport};
use super::normalizer::{bounds, denormalize, normalize};
use super::retrain::RetrainPolicy;
use super::sample_store::{Sample, SampleStore};
use super::FEATURE_WIDTH;
use crate::error::{PredictorError, Result};
use crate::settings::Settings;

/// What an ingest did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub samples: usize,
    pub retrained: Option<TrainingReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub ready: bool,
    pub samples: usize,
    pub retrain_threshold: usize,
    pub model_version: u64,
    pub artifact_present: bool,
}

/// Application state shared by the HTTP handlers. Ingests are serialized on the store lock,
/// which is held across the append, the mirror rewrite and any retrain it triggers.
pub struct FeedbackPredictor {
    store: Mutex<SampleStore>,
    /// Stored sample count, readable while an ingest holds the store lock.
    stored: AtomicUsize,
    model: ModelManager,
    policy: RetrainPolicy,
}

impl FeedbackPredictor {
    /// Loads the dataset mirror, builds the model and swaps in the persisted artifact if there
    /// is one. Nothing should be served before this returns.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = SampleStore::load_all(&settings.storage.data_file)?;
        let model = ModelManager::construct(&settings.storage.model_file, &settings.training)?;
        model.load_if_present()?;

        Ok(Self {
            stored: AtomicUsize::new(store.len()),
            store: Mutex::new(store),
            model,
            policy: RetrainPolicy::new(settings.training.retrain_threshold),
        })
    }

    /// Normalizes and stores one labelled vector, then retrains if the policy says so. When
    /// the retrain fails the sample stays stored and the error is returned.
    pub fn ingest(&self, input_values: &[f64], is_correct: bool) -> Result<IngestOutcome> {
        validate(input_values)?;
        let sample = Sample::new(normalize(input_values), is_correct);

        let mut store = self.store.lock();
        store.append(sample)?;
        let samples = store.len();
        self.stored.store(samples, Ordering::SeqCst);
        debug!("Stored sample {samples} (label {})", u8::from(is_correct));

        if !self.policy.should_retrain(samples) {
            return Ok(IngestOutcome {
                samples,
                retrained: None,
            });
        }

        match self.model.train(store.samples()) {
            Ok(report) => Ok(IngestOutcome {
                samples,
                retrained: Some(report),
            }),
            Err(e) => {
                error!("Retrain over {samples} samples failed: {e}");
                Err(e)
            }
        }
    }

    /// Prediction rescaled into the range of `input_values` itself.
    pub fn predict(&self, input_values: &[f64]) -> Result<f64> {
        validate(input_values)?;
        let raw = self.model.predict(&normalize(input_values))?;
        Ok(denormalize(raw, input_values))
    }

    pub fn status(&self) -> Status {
        Status {
            ready: true,
            samples: self.stored.load(Ordering::SeqCst),
            retrain_threshold: self.policy.threshold(),
            model_version: self.model.version(),
            artifact_present: self.model.artifact_path().exists(),
        }
    }

    #[cfg(test)]
    pub fn model(&self) -> &ModelManager {
        &self.model
    }

    /// Copy of the current dataset.
    #[cfg(test)]
    pub fn samples(&self) -> Vec<Sample> {
        self.store.lock().samples().to_vec()
    }
}

fn validate(input_values: &[f64]) -> Result<()> {
    if input_values.len() != FEATURE_WIDTH {
        return Err(PredictorError::invalid_input(format!(
            "inputValues must hold {FEATURE_WIDTH} numbers, got {}",
            input_values.len()
        )));
    }
    if let Some(bad) = input_values.iter().find(|v| !v.is_finite()) {
        return Err(PredictorError::invalid_input(format!(
            "inputValues must be finite, got {bad}"
        )));
    }

    // Finite values can still span more than f64::MAX, which normalizes to NaN.
    let (min, max) = bounds(input_values);
    if !(max - min).is_finite() {
        return Err(PredictorError::invalid_input(format!(
            "inputValues range from {min} to {max}, too wide to normalize"
        )));
    }
    Ok(())
}
