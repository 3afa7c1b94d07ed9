use super::{SinkError, TelemetrySink};
use crate::domain::TelemetrySample;

/// Keeps every sample in memory. Failures can be injected for tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    samples: Vec<TelemetrySample>,
    failures_remaining: u32,
    attempts: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write attempts fail
    pub fn fail_next(&mut self, n: u32) {
        self.failures_remaining = n;
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<TelemetrySample> {
        self.samples
    }

    /// Write attempts seen, failed ones included
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

impl TelemetrySink for MemorySink {
    fn write_batch(&mut self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        self.attempts += 1;
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(SinkError::Injected(self.attempts));
        }
        self.samples.extend_from_slice(samples);
        Ok(())
    }
}
