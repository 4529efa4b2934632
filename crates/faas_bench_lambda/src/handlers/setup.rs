//! Setup phase: turn a configuration into a pool of deployed gateways.
//!
//! Already deployed functions of the right package type are repurposed first;
//! only the shortfall is deployed fresh. Provider calls run one at a time so
//! every quota check sees the result of the call before it. Functions claimed
//! by the plan or already handed out are never chosen for eviction.

use std::path::Path;

use faas_bench_core::deployment::{plan_function_allocation, FunctionAction};
use faas_bench_core::experiment::{required_gateways, Configuration, GatewayEndpoint, SubExperimentConfig};
use faas_bench_core::provider::{PackageType, PackagingStrategy, Runtime, UploadPath};
use tracing::info;

use crate::adapters::connection::{ArtifactSource, FunctionConnection};
use crate::adapters::object_store::ArtifactStore;
use crate::error::{BenchError, Result};
use crate::packaging::{PackagedArtifact, Packager};
use crate::provisioning::Provisioner;

#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Directory name of the function sources under the artifacts root.
    pub function_name: String,
    /// Object key prefix for archives staged in the bulk store.
    pub artifact_key_prefix: String,
    /// Container image used by sub-experiments with the `Image` package type.
    pub image_uri: Option<String>,
}

pub async fn run_setup<C, S>(
    configuration: &Configuration,
    packager: &Packager,
    provisioner: &Provisioner<C>,
    store: Option<&S>,
    options: &SetupOptions,
) -> Result<Vec<GatewayEndpoint>>
where
    C: FunctionConnection,
    S: ArtifactStore,
{
    let existing = provisioner.list().await?;
    let plan = plan_function_allocation(&existing, &configuration.sub_experiments);
    info!(
        gateways = required_gateways(&configuration.sub_experiments),
        existing = existing.len(),
        updates = plan.update_count(),
        deployments = plan.deploy_count(),
        "Planned function allocation"
    );

    let mut protected = plan.claimed_gateways();
    let mut pool = Vec::with_capacity(required_gateways(&configuration.sub_experiments));
    for (id, (config, actions)) in configuration
        .sub_experiments
        .iter()
        .zip(&plan.sub_experiments)
        .enumerate()
    {
        if actions.is_empty() {
            continue;
        }
        let artifact = prepare_artifact(id, configuration.runtime, config, packager, store, options).await?;

        for action in actions {
            let gateway_id = match action {
                FunctionAction::Update { gateway_id } => {
                    provisioner
                        .update(config.package_type, gateway_id, config.function_memory_mb, &artifact)
                        .await?;
                    gateway_id.clone()
                }
                FunctionAction::Deploy => {
                    provisioner
                        .deploy(
                            config.package_type,
                            configuration.runtime,
                            config.function_memory_mb,
                            &artifact,
                            &protected,
                        )
                        .await?
                }
            };
            info!(sub_experiment = id, gateway_id, "Gateway ready");
            protected.insert(gateway_id.clone());
            pool.push(GatewayEndpoint::new(gateway_id));
        }

        if config.package_type == PackageType::Zip {
            discard_generated_archive(
                configuration.runtime,
                &packager.archive_path(&options.function_name),
            )?;
        }
    }

    Ok(pool)
}

async fn prepare_artifact<S: ArtifactStore>(
    id: usize,
    runtime: Runtime,
    config: &SubExperimentConfig,
    packager: &Packager,
    store: Option<&S>,
    options: &SetupOptions,
) -> Result<ArtifactSource> {
    if config.package_type == PackageType::Image {
        return options
            .image_uri
            .clone()
            .map(|uri| ArtifactSource::Image { uri })
            .ok_or_else(|| {
                BenchError::Other(format!(
                    "sub-experiment {id} uses the Image package type but no image URI was given"
                ))
            });
    }

    let packaged = package_blocking(id, runtime, config, packager, options).await?;
    match packaged.upload_path() {
        UploadPath::Inline => ArtifactSource::inline(&packaged),
        UploadPath::BulkObjectStore => {
            let store = store.ok_or_else(|| {
                BenchError::Other(format!(
                    "archive {} exceeds the inline upload limit and no artifact bucket is configured",
                    packaged.path.display()
                ))
            })?;
            let key = format!(
                "{}/{}-{id}.zip",
                options.artifact_key_prefix.trim_end_matches('/'),
                options.function_name
            );
            store.upload_artifact(&key, &packaged.path).await
        }
    }
}

async fn package_blocking(
    id: usize,
    runtime: Runtime,
    config: &SubExperimentConfig,
    packager: &Packager,
    options: &SetupOptions,
) -> Result<PackagedArtifact> {
    let packager = packager.clone();
    let function_name = options.function_name.clone();
    let target_size_bytes = config.target_image_size_bytes();

    tokio::task::spawn_blocking(move || {
        packager.package(id, runtime, &function_name, target_size_bytes)
    })
    .await
    .map_err(|error| BenchError::Other(format!("packaging task failed: {error}")))?
}

/// Generated archives are rebuilt for every sub-experiment; prebuilt ones are
/// owned by the build step that produced them.
fn discard_generated_archive(runtime: Runtime, path: &Path) -> Result<()> {
    if let PackagingStrategy::General { .. } = runtime.packaging_strategy() {
        std::fs::remove_file(path).map_err(|error| BenchError::io(path, error))?;
    }
    Ok(())
}
