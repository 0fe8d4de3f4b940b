use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::durable;
use crate::error::{PredictorError, Result};

/// One normalized observation. The on-disk shape matches `data.json` as written by earlier
/// deployments: `{"inputValues": [...], "label": 0|1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub input_values: Vec<f64>,
    pub label: u8,
}

impl Sample {
    pub fn new(input_values: Vec<f64>, is_correct: bool) -> Self {
        Self {
            input_values,
            label: u8::from(is_correct),
        }
    }
}

/// Append-only, in-memory dataset mirrored wholesale to a JSON file on every write.
#[derive(Debug)]
pub struct SampleStore {
    path: PathBuf,
    samples: Vec<Sample>,
}

impl SampleStore {
    /// Reads the mirror at `path` into memory, or starts empty when there is none.
    /// A mirror that does not parse is an error.
    pub fn load_all(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let samples = match durable::read_if_present(&path)? {
            Some(bytes) => serde_json::from_slice::<Vec<Sample>>(&bytes).map_err(|source| {
                PredictorError::CorruptDataset {
                    path: path.clone(),
                    source,
                }
            })?,
            None => {
                info!("No dataset at {}, starting empty", path.display());
                Vec::new()
            }
        };

        info!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self { path, samples })
    }

    /// Pushes `sample` and rewrites the whole mirror. If the rewrite fails the push is undone,
    /// so memory never runs ahead of disk.
    pub fn append(&mut self, sample: Sample) -> Result<()> {
        self.samples.push(sample);

        if let Err(e) = durable::write_json_atomically(&self.path, &self.samples) {
            self.samples.pop();
            return Err(e);
        }

        debug!("Dataset mirror rewritten with {} samples", self.samples.len());
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
