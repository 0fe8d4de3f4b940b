use std::path::PathBuf;

use config::{Config, Environment, File};
use log::LevelFilter;
use serde::Deserialize;

use crate::error::{PredictorError, Result};
use crate::lln::neural_network::FitOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub training: TrainingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_file: PathBuf,
    pub model_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data.json"),
            model_file: PathBuf::from("model.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub learning_rate: f32,
    /// Retrain after an ingest once the dataset holds more than this many samples.
    pub retrain_threshold: usize,
    /// Fixes weight initialisation, shuffling and dropout masks.
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            learning_rate: 0.001,
            retrain_threshold: 10,
            seed: None,
        }
    }
}

impl TrainingSettings {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingSettings {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level.parse().map_err(|_| {
            PredictorError::InvalidSettings(format!(
                "logging.level must be off, error, warn, info, debug or trace, got {:?}",
                self.level
            ))
        })
    }
}

impl Settings {
    /// Defaults, then an optional `config.{toml,yaml,json,...}` in the working directory, then
    /// `FEEDBACK__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("FEEDBACK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let training = &self.training;

        if training.epochs == 0 {
            return Err(PredictorError::InvalidSettings("training.epochs must be positive".into()));
        }
        if training.batch_size == 0 {
            return Err(PredictorError::InvalidSettings(
                "training.batch_size must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&training.validation_split) {
            return Err(PredictorError::InvalidSettings(
                "training.validation_split must lie in [0, 1)".into(),
            ));
        }
        if training.learning_rate.is_nan() || training.learning_rate <= 0.0 {
            return Err(PredictorError::InvalidSettings(
                "training.learning_rate must be positive".into(),
            ));
        }
        // The first retrain sees threshold + 1 samples and must keep at least one for training.
        let first_fit = (training.retrain_threshold + 1) as f64 * (1.0 - training.validation_split);
        if first_fit.floor() < 1.0 {
            return Err(PredictorError::InvalidSettings(format!(
                "training.retrain_threshold {} leaves no training rows at validation_split {}",
                training.retrain_threshold, training.validation_split
            )));
        }
        self.logging.level_filter()?;

        Ok(())
    }
}
