use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use faas_bench_core::experiment::parse_configuration;
use faas_bench_core::provider::Provider;
use faas_bench_lambda::adapters::aws_connection::{
    AwsConnection, AwsConnectionSettings, DEFAULT_FUNCTION_NAME_PREFIX,
};
use faas_bench_lambda::adapters::connection::RetryPolicy;
use faas_bench_lambda::adapters::object_store::S3ArtifactStore;
use faas_bench_lambda::adapters::session::{AwsSession, DEFAULT_REGION};
use faas_bench_lambda::gateways::write_gateway_pool;
use faas_bench_lambda::handlers::setup::{run_setup, SetupOptions};
use faas_bench_lambda::logging::init_logging;
use faas_bench_lambda::packaging::Packager;
use faas_bench_lambda::provisioning::Provisioner;
use faas_bench_lambda::{BenchError, Result};
use tracing::{error, info};

/// Packages and deploys the functions a configuration needs, then writes the
/// resulting gateway pool for the client.
#[derive(Debug, Parser)]
#[command(name = "bench_setup")]
struct Cli {
    #[arg(long, default_value = "config.json")]
    config_path: PathBuf,

    #[arg(long, default_value = "gateways.csv")]
    gateways_path: PathBuf,

    /// Root holding one directory of function sources per function name.
    #[arg(long, default_value = "artifacts")]
    artifacts_path: PathBuf,

    #[arg(long, default_value = "producer-consumer")]
    function_name: String,

    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    #[arg(long, env = "FAAS_BENCH_LAMBDA_ROLE_ARN")]
    lambda_role_arn: Option<String>,

    /// Bucket for archives above the inline upload limit.
    #[arg(long, env = "FAAS_BENCH_ARTIFACT_BUCKET")]
    artifact_bucket: Option<String>,

    #[arg(long, default_value = "faas-bench/archives")]
    artifact_key_prefix: String,

    #[arg(long, env = "FAAS_BENCH_IMAGE_URI")]
    image_uri: Option<String>,

    #[arg(long, default_value = DEFAULT_FUNCTION_NAME_PREFIX)]
    function_name_prefix: String,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging(&cli.log_level, None) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "Setup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let raw = std::fs::read(&cli.config_path).map_err(|error| BenchError::io(&cli.config_path, error))?;
    let configuration = parse_configuration(&raw)?;
    info!(
        config = %cli.config_path.display(),
        provider = %configuration.provider,
        runtime = %configuration.runtime,
        sub_experiments = configuration.sub_experiments.len(),
        "Loaded configuration"
    );

    let pool = match configuration.provider {
        Provider::Aws => {
            let session = Arc::new(AwsSession::new(cli.region.clone()));
            let connection = AwsConnection::new(
                Arc::clone(&session),
                AwsConnectionSettings {
                    lambda_role_arn: cli.lambda_role_arn.clone(),
                    function_name_prefix: cli.function_name_prefix.clone(),
                    ..AwsConnectionSettings::default()
                },
            );
            let provisioner = Provisioner::new(connection, RetryPolicy::default());
            let store = cli
                .artifact_bucket
                .as_ref()
                .map(|bucket| S3ArtifactStore::new(Arc::clone(&session), bucket.clone()));
            let options = SetupOptions {
                function_name: cli.function_name.clone(),
                artifact_key_prefix: cli.artifact_key_prefix.clone(),
                image_uri: cli.image_uri.clone(),
            };

            run_setup(
                &configuration,
                &Packager::new(&cli.artifacts_path),
                &provisioner,
                store.as_ref(),
                &options,
            )
            .await?
        }
    };

    write_gateway_pool(&cli.gateways_path, &pool)?;
    info!(
        gateways = pool.len(),
        path = %cli.gateways_path.display(),
        "Gateway pool written"
    );
    Ok(())
}
