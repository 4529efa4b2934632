use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use faas_bench_core::experiment::{assign_gateways, parse_configuration, ExperimentSelection};
use faas_bench_lambda::adapters::invoke::HttpGatewayInvoker;
use faas_bench_lambda::adapters::session::DEFAULT_REGION;
use faas_bench_lambda::gateways::read_gateway_pool;
use faas_bench_lambda::handlers::orchestrator::{run_experiments, shutdown_signal, RunOptions};
use faas_bench_lambda::logging::{init_logging, RUN_LOG_FILE_NAME};
use faas_bench_lambda::{BenchError, Result};
use tracing::{error, info, warn};

const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Fires the configured bursts at a deployed gateway pool and records
/// per-request client latency.
#[derive(Debug, Parser)]
#[command(name = "bench_client")]
struct Cli {
    /// Parent directory for timestamped run directories.
    #[arg(long, default_value = "latency-samples")]
    output_path: PathBuf,

    #[arg(long, default_value = "config.json")]
    config_path: PathBuf,

    #[arg(long, default_value = "gateways.csv")]
    gateways_path: PathBuf,

    /// Index of the only sub-experiment to run; -1 runs all of them.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    run_experiment: i64,

    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    #[arg(long, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Base seed for stochastic inter-arrival times.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let run_dir = cli
        .output_path
        .join(Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string());
    let log_file = match create_run_dir(&run_dir) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = init_logging(&cli.log_level, Some(log_file)) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    tokio::select! {
        result = run(cli, run_dir) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                error!(%error, "Client run failed");
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            warn!("Interrupted, exiting without waiting for in-flight requests");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    }
}

fn create_run_dir(run_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(run_dir).map_err(|error| BenchError::io(run_dir, error))?;
    let log_path = run_dir.join(RUN_LOG_FILE_NAME);
    File::create(&log_path).map_err(|error| BenchError::io(&log_path, error))
}

async fn run(cli: Cli, run_dir: PathBuf) -> Result<()> {
    let raw = std::fs::read(&cli.config_path).map_err(|error| BenchError::io(&cli.config_path, error))?;
    let configuration = parse_configuration(&raw)?;
    let pool = read_gateway_pool(&cli.gateways_path)?;
    info!(
        run_dir = %run_dir.display(),
        sub_experiments = configuration.sub_experiments.len(),
        gateways = pool.len(),
        "Loaded configuration and gateway pool"
    );

    let experiments = assign_gateways(configuration.sub_experiments, &pool)?;
    let selection = ExperimentSelection::from_flag(cli.run_experiment).map_err(BenchError::Other)?;
    let experiments = selection.select(experiments)?;

    let invoker = Arc::new(HttpGatewayInvoker::new(
        configuration.provider,
        cli.region,
        Duration::from_secs(cli.request_timeout_secs),
    )?);
    let options = RunOptions {
        output_dir: run_dir,
        seed: cli.seed,
    };

    run_experiments(experiments, invoker, configuration.sequential, &options).await?;
    info!("All sub-experiments complete");
    Ok(())
}
