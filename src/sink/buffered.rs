use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use validator::Validate;

use super::{SinkError, TelemetrySink};
use crate::domain::TelemetrySample;

/// Retry schedule for failed batch writes
///
/// Attempt `n` (1-based) that fails waits `base_delay_ms * 2^(n-1)`, capped
/// at `max_delay_ms`, before the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryPolicy {
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Batches samples in front of a sink
#[derive(Debug)]
pub struct BufferedWriter<S> {
    sink: S,
    batch_size: usize,
    retry: RetryPolicy,
    pending: Vec<TelemetrySample>,
    pending_last_tick: Option<u64>,
    last_persisted_tick: Option<u64>,
    batches_written: u64,
    samples_written: u64,
}

impl<S: TelemetrySink> BufferedWriter<S> {
    pub fn new(sink: S, batch_size: usize, retry: RetryPolicy) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            retry,
            pending: Vec::with_capacity(batch_size),
            pending_last_tick: None,
            last_persisted_tick: None,
            batches_written: 0,
            samples_written: 0,
        }
    }

    /// Buffer the sample for `tick`, writing the batch once it is full
    pub fn push(&mut self, tick: u64, sample: TelemetrySample) -> Result<(), SinkError> {
        self.pending.push(sample);
        self.pending_last_tick = Some(tick);
        if self.pending.len() >= self.batch_size {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Write whatever is buffered. On failure the buffer is kept intact.
    pub fn flush_pending(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.sink.write_batch(&self.pending) {
                Ok(()) => {
                    self.batches_written += 1;
                    self.samples_written += self.pending.len() as u64;
                    self.last_persisted_tick = self.pending_last_tick;
                    debug!(
                        samples = self.pending.len(),
                        last_tick = ?self.last_persisted_tick,
                        "Batch persisted"
                    );
                    self.pending.clear();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Batch write failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(self.retry.delay_for(attempt));
                    }
                }
            }
        }

        error!(
            attempts,
            pending = self.pending.len(),
            "Giving up on batch, keeping it buffered"
        );
        Err(SinkError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    /// Flush the buffer and the underlying sink
    pub fn finish(&mut self) -> Result<(), SinkError> {
        self.flush_pending()?;
        self.sink.flush()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_persisted_tick(&self) -> Option<u64> {
        self.last_persisted_tick
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThermalStatus;
    use crate::sink::MemorySink;
    use chrono::{TimeZone, Utc};

    fn sample(tick: u64) -> TelemetrySample {
        TelemetrySample {
            time: Utc.timestamp_opt(1_700_000_000 + tick as i64, 0).unwrap(),
            vehicle_id: "VEH001".to_string(),
            soc_percent: 50.0,
            voltage: 360.0,
            current: 0.0,
            temperature: 25.0,
            power: 0.0,
            soh_percent: 100.0,
            is_charging: false,
            is_driving: false,
            speed: 0.0,
            thermal_status: ThermalStatus::Normal,
            anomaly_active: None,
        }
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_batches_flush_at_size() {
        let mut writer = BufferedWriter::new(MemorySink::new(), 3, RetryPolicy::immediate(1));
        for tick in 0..7 {
            writer.push(tick, sample(tick)).unwrap();
        }
        assert_eq!(writer.batches_written(), 2);
        assert_eq!(writer.pending_len(), 1);
        assert_eq!(writer.last_persisted_tick(), Some(5));

        writer.finish().unwrap();
        assert_eq!(writer.last_persisted_tick(), Some(6));
        assert_eq!(writer.sink().samples().len(), 7);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let mut sink = MemorySink::new();
        sink.fail_next(2);
        let mut writer = BufferedWriter::new(sink, 2, RetryPolicy::immediate(3));
        writer.push(0, sample(0)).unwrap();
        writer.push(1, sample(1)).unwrap();
        assert_eq!(writer.last_persisted_tick(), Some(1));
        assert_eq!(writer.sink().attempts(), 3);
    }

    #[test]
    fn test_exhausted_retries_keep_buffer() {
        let mut sink = MemorySink::new();
        sink.fail_next(5);
        let mut writer = BufferedWriter::new(sink, 2, RetryPolicy::immediate(2));
        writer.push(0, sample(0)).unwrap();
        let err = writer.push(1, sample(1)).unwrap_err();
        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(writer.pending_len(), 2);
        assert_eq!(writer.last_persisted_tick(), None);

        writer.sink_mut().fail_next(0);
        writer.flush_pending().unwrap();
        assert_eq!(writer.last_persisted_tick(), Some(1));
        assert_eq!(writer.sink().samples().len(), 2);
    }
}
