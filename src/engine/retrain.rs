/// Retrains on the whole dataset after every ingest once the dataset grows past `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrainPolicy {
    threshold: usize,
}

impl RetrainPolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn should_retrain(&self, dataset_len: usize) -> bool {
        dataset_len > self.threshold
    }
}
