//! Latency samples produced by the orchestrator and their summary statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    pub sub_experiment_id: usize,
    pub burst_id: usize,
    pub sent_at_unix_ms: u64,
    pub received_at_unix_ms: u64,
    pub latency: Duration,
    /// Empty when the response body carried no identifier.
    pub request_id: String,
}

impl LatencySample {
    pub fn to_row(&self) -> LatencyRow {
        LatencyRow {
            sent_at: self.sent_at_unix_ms,
            received_at: self.received_at_unix_ms,
            client_latency_ms: self.latency.as_secs_f64() * 1_000.0,
            request_id: self.request_id.clone(),
            burst_id: self.burst_id,
        }
    }
}

/// Latency file row; column names are read by the external plotter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRow {
    #[serde(rename = "Sent At")]
    pub sent_at: u64,
    #[serde(rename = "Received At")]
    pub received_at: u64,
    #[serde(rename = "Client Latency (ms)")]
    pub client_latency_ms: f64,
    #[serde(rename = "Request ID")]
    pub request_id: String,
    #[serde(rename = "Burst ID")]
    pub burst_id: usize,
}

/// Burst delta file row, consumed for per-burst histogram bucketing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstDeltaRow {
    #[serde(rename = "Burst ID")]
    pub burst_id: usize,
    #[serde(rename = "Delta (ms)")]
    pub delta_ms: f64,
}

pub fn burst_delta_rows(deltas: &[Duration]) -> Vec<BurstDeltaRow> {
    deltas
        .iter()
        .enumerate()
        .map(|(burst_id, delta)| BurstDeltaRow {
            burst_id,
            delta_ms: delta.as_secs_f64() * 1_000.0,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_latencies(latencies: &[Duration]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<f64> = latencies
            .iter()
            .map(|latency| latency.as_secs_f64() * 1_000.0)
            .collect();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean_ms = sorted.iter().sum::<f64>() / count as f64;

        Self {
            count,
            mean_ms,
            median_ms: nearest_rank(&sorted, 0.50),
            p90_ms: nearest_rank(&sorted, 0.90),
            p99_ms: nearest_rank(&sorted, 0.99),
            max_ms: sorted[count - 1],
        }
    }
}

fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
