//! CSV outputs written per sub-experiment.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use faas_bench_core::latency::{burst_delta_rows, LatencySample};

use crate::error::{BenchError, Result};

pub const LATENCIES_FILE_NAME: &str = "latencies.csv";
pub const BURST_DELTAS_FILE_NAME: &str = "burst_deltas.csv";
pub const LATENCY_COLUMNS: [&str; 5] = [
    "Sent At",
    "Received At",
    "Client Latency (ms)",
    "Request ID",
    "Burst ID",
];

/// Appends one row per completed request, flushed as it arrives so an
/// interrupted run keeps everything recorded so far.
pub struct LatencyRecorder {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: usize,
}

impl LatencyRecorder {
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(LATENCIES_FILE_NAME);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        writer.write_record(LATENCY_COLUMNS)?;
        writer.flush().map_err(|error| BenchError::io(&path, error))?;

        Ok(Self {
            path,
            writer,
            rows_written: 0,
        })
    }

    pub fn record(&mut self, sample: &LatencySample) -> Result<()> {
        self.writer.serialize(sample.to_row())?;
        self.writer
            .flush()
            .map_err(|error| BenchError::io(&self.path, error))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn write_burst_deltas(dir: &Path, deltas: &[Duration]) -> Result<PathBuf> {
    let path = dir.join(BURST_DELTAS_FILE_NAME);
    let mut writer = csv::Writer::from_path(&path)?;
    for row in burst_delta_rows(deltas) {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|error| BenchError::io(&path, error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faas_bench_core::latency::{BurstDeltaRow, LatencyRow};

    fn sample(burst_id: usize, request_id: &str) -> LatencySample {
        LatencySample {
            sub_experiment_id: 0,
            burst_id,
            sent_at_unix_ms: 1_700_000_000_000,
            received_at_unix_ms: 1_700_000_000_250,
            latency: Duration::from_millis(250),
            request_id: request_id.to_string(),
        }
    }

    #[test]
    fn latency_file_has_header_before_any_sample() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = LatencyRecorder::create(dir.path()).unwrap();

        let contents = std::fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(
            contents.trim_end(),
            "Sent At,Received At,Client Latency (ms),Request ID,Burst ID"
        );
    }

    #[test]
    fn recorded_samples_are_readable_as_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = LatencyRecorder::create(dir.path()).unwrap();
        recorder.record(&sample(0, "req-a")).unwrap();
        recorder.record(&sample(1, "")).unwrap();
        assert_eq!(recorder.rows_written(), 2);

        let mut reader = csv::Reader::from_path(dir.path().join(LATENCIES_FILE_NAME)).unwrap();
        let rows: Vec<LatencyRow> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].request_id, "req-a");
        assert_eq!(rows[0].client_latency_ms, 250.0);
        assert_eq!(rows[1].request_id, "");
        assert_eq!(rows[1].burst_id, 1);
    }

    #[test]
    fn burst_deltas_are_written_in_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_burst_deltas(
            dir.path(),
            &[Duration::from_millis(1500), Duration::from_millis(20)],
        )
        .unwrap();

        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["Burst ID", "Delta (ms)"]);
        let rows: Vec<BurstDeltaRow> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(rows[0].delta_ms, 1500.0);
        assert_eq!(rows[1].burst_id, 1);
    }
}
