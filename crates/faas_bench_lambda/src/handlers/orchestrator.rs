//! Experiment orchestration and burst scheduling.
//!
//! Bursts depart on a schedule computed before the first request. Every
//! request runs in its own task and every burst gets a task that waits for
//! all of its requests, so a slow burst never delays the departure of the
//! next one. Completed samples flow through a channel to a single writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use faas_bench_core::experiment::SubExperiment;
use faas_bench_core::latency::{LatencySample, LatencySummary};
use faas_bench_core::schedule::BurstSchedule;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::invoke::{GatewayInvoker, InvocationRequest};
use crate::error::{BenchError, Result};
use crate::recorder::{write_burst_deltas, LatencyRecorder};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run directory; each sub-experiment writes into its own subdirectory.
    pub output_dir: PathBuf,
    /// Base seed for inter-arrival sampling; drawn from the OS when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentReport {
    pub sub_experiment_id: usize,
    pub output_dir: PathBuf,
    pub seed: u64,
    pub requests_sent: usize,
    pub samples_recorded: usize,
    pub failed_requests: usize,
    pub summary: LatencySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestOutcome {
    Recorded,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BurstOutcome {
    recorded: usize,
    failed: usize,
}

/// Runs the selected sub-experiments, concurrently unless `sequential`.
pub async fn run_experiments<I: GatewayInvoker>(
    experiments: Vec<SubExperiment>,
    invoker: Arc<I>,
    sequential: bool,
    options: &RunOptions,
) -> Result<Vec<ExperimentReport>> {
    let base_seed = options.seed.unwrap_or_else(rand::random);
    info!(
        count = experiments.len(),
        sequential,
        base_seed,
        "Starting experiments"
    );

    let mut reports = Vec::with_capacity(experiments.len());
    if sequential {
        for experiment in experiments {
            let seed = base_seed.wrapping_add(experiment.id as u64);
            reports.push(
                run_sub_experiment(experiment, Arc::clone(&invoker), options.output_dir.clone(), seed)
                    .await?,
            );
        }
    } else {
        let mut tasks = JoinSet::new();
        for experiment in experiments {
            let seed = base_seed.wrapping_add(experiment.id as u64);
            tasks.spawn(run_sub_experiment(
                experiment,
                Arc::clone(&invoker),
                options.output_dir.clone(),
                seed,
            ));
        }
        while let Some(joined) = tasks.join_next().await {
            let report = joined
                .map_err(|error| BenchError::Other(format!("sub-experiment task failed: {error}")))??;
            reports.push(report);
        }
        reports.sort_by_key(|report| report.sub_experiment_id);
    }

    for report in &reports {
        info!(
            sub_experiment = report.sub_experiment_id,
            samples = report.samples_recorded,
            failed = report.failed_requests,
            mean_ms = report.summary.mean_ms,
            median_ms = report.summary.median_ms,
            p99_ms = report.summary.p99_ms,
            "Sub-experiment complete"
        );
    }
    Ok(reports)
}

pub async fn run_sub_experiment<I: GatewayInvoker>(
    experiment: SubExperiment,
    invoker: Arc<I>,
    run_dir: PathBuf,
    seed: u64,
) -> Result<ExperimentReport> {
    let output_dir = run_dir.join(experiment.label());
    std::fs::create_dir_all(&output_dir).map_err(|error| BenchError::io(&output_dir, error))?;

    let schedule = BurstSchedule::for_sub_experiment(&experiment.config, seed);
    write_burst_deltas(&output_dir, schedule.deltas())?;
    info!(
        sub_experiment = experiment.id,
        title = %experiment.config.title,
        bursts = experiment.config.bursts,
        iat_type = ?experiment.config.iat_type,
        seed,
        "Starting sub-experiment"
    );

    let (samples_tx, samples_rx) = mpsc::unbounded_channel();
    let writer = spawn_sample_writer(&output_dir, samples_rx)?;

    let start = Instant::now();
    let mut barriers: Vec<JoinHandle<BurstOutcome>> = Vec::with_capacity(schedule.len());
    let mut requests_sent = 0usize;

    for (burst_id, offset) in schedule.departure_offsets().into_iter().enumerate() {
        tokio::time::sleep_until(start + offset).await;

        let burst_size = experiment.config.burst_size(burst_id);
        let mut burst = JoinSet::new();
        for request_index in 0..burst_size {
            let Some(endpoint) = experiment.gateway_for_request(request_index) else {
                warn!(sub_experiment = experiment.id, "No gateway assigned, skipping request");
                continue;
            };
            let request = InvocationRequest {
                endpoint: endpoint.clone(),
                payload_length_bytes: experiment.config.payload_length_bytes,
                increment_limit: experiment.config.increment_limit(burst_id),
            };
            burst.spawn(send_request(
                Arc::clone(&invoker),
                request,
                experiment.id,
                burst_id,
                samples_tx.clone(),
            ));
            requests_sent += 1;
        }
        debug!(sub_experiment = experiment.id, burst_id, burst_size, "Burst departed");
        barriers.push(tokio::spawn(await_burst(experiment.id, burst_id, burst)));
    }
    drop(samples_tx);

    let mut failed_requests = 0usize;
    for barrier in barriers {
        match barrier.await {
            Ok(outcome) => failed_requests += outcome.failed,
            Err(error) => error!(sub_experiment = experiment.id, %error, "Burst barrier task failed"),
        }
    }

    let latencies = writer
        .await
        .map_err(|error| BenchError::Other(format!("latency writer task failed: {error}")))??;

    Ok(ExperimentReport {
        sub_experiment_id: experiment.id,
        output_dir,
        seed,
        requests_sent,
        samples_recorded: latencies.len(),
        failed_requests,
        summary: LatencySummary::from_latencies(&latencies),
    })
}

async fn send_request<I: GatewayInvoker>(
    invoker: Arc<I>,
    request: InvocationRequest,
    sub_experiment_id: usize,
    burst_id: usize,
    samples: mpsc::UnboundedSender<LatencySample>,
) -> RequestOutcome {
    let sent_at_unix_ms = unix_millis();
    let started = Instant::now();
    let endpoint = request.endpoint.clone();

    match invoker.invoke(request).await {
        Ok(response) => {
            let sample = LatencySample {
                sub_experiment_id,
                burst_id,
                sent_at_unix_ms,
                received_at_unix_ms: unix_millis(),
                latency: started.elapsed(),
                request_id: response.request_id.unwrap_or_default(),
            };
            if samples.send(sample).is_err() {
                warn!(sub_experiment = sub_experiment_id, burst_id, "Latency writer is gone, sample dropped");
            }
            RequestOutcome::Recorded
        }
        Err(error) => {
            error!(
                sub_experiment = sub_experiment_id,
                burst_id,
                gateway = %endpoint,
                %error,
                "Request failed"
            );
            RequestOutcome::Failed
        }
    }
}

async fn await_burst(
    sub_experiment_id: usize,
    burst_id: usize,
    mut requests: JoinSet<RequestOutcome>,
) -> BurstOutcome {
    let mut outcome = BurstOutcome::default();
    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok(RequestOutcome::Recorded) => outcome.recorded += 1,
            Ok(RequestOutcome::Failed) => outcome.failed += 1,
            Err(error) => {
                error!(sub_experiment = sub_experiment_id, burst_id, %error, "Request task failed");
                outcome.failed += 1;
            }
        }
    }
    debug!(
        sub_experiment = sub_experiment_id,
        burst_id,
        recorded = outcome.recorded,
        failed = outcome.failed,
        "Burst complete"
    );
    outcome
}

fn spawn_sample_writer(
    output_dir: &Path,
    mut samples: mpsc::UnboundedReceiver<LatencySample>,
) -> Result<JoinHandle<Result<Vec<std::time::Duration>>>> {
    let mut recorder = LatencyRecorder::create(output_dir)?;
    Ok(tokio::spawn(async move {
        let mut latencies = Vec::new();
        while let Some(sample) = samples.recv().await {
            recorder.record(&sample)?;
            latencies.push(sample.latency);
        }
        debug!(
            path = %recorder.path().display(),
            rows = recorder.rows_written(),
            "Latency file closed"
        );
        Ok(latencies)
    }))
}

fn unix_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
