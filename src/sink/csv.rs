use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{SinkError, TelemetrySink};
use crate::domain::TelemetrySample;

/// Telemetry as CSV, one row per sample with a single header row
pub struct CsvSink<W: Write = File> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl CsvSink<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write + Send> TelemetrySink for CsvSink<W> {
    fn write_batch(&mut self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        for sample in samples {
            self.writer.serialize(sample)?;
        }
        self.writer.flush()?;
        self.rows += samples.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
