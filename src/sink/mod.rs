//! Telemetry sinks
//!
//! The orchestrator never writes to storage directly. Samples go through a
//! [`BufferedWriter`] which batches them, retries failed batches with
//! backoff and tracks the last tick that is known to be persisted.

pub mod buffered;
pub mod csv;
pub mod export;
pub mod memory;

pub use buffered::{BufferedWriter, RetryPolicy};
pub use self::csv::CsvSink;
pub use memory::MemorySink;

use thiserror::Error;

use crate::domain::TelemetrySample;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Injected sink failure on batch {0}")]
    Injected(u64),
    #[error("Sink write failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Destination for telemetry samples
pub trait TelemetrySink: Send {
    /// Persist a batch in order. Either the whole batch is accepted or an
    /// error is returned and the caller retries the same batch.
    fn write_batch(&mut self, samples: &[TelemetrySample]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn write_batch(&mut self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        (**self).write_batch(samples)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}
