//! Provider-agnostic view of deployed benchmark functions.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use faas_bench_core::deployment::FunctionDeploymentRecord;
use faas_bench_core::provider::{PackageType, Runtime, UploadPath};

use crate::error::{BenchError, Result};
use crate::packaging::PackagedArtifact;

/// Where the provider should pull function code from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Archive bytes sent with the deploy request.
    Inline { path: PathBuf },
    /// Archive previously uploaded to the bulk object store.
    ObjectStore { bucket: String, key: String },
    /// Container image reference.
    Image { uri: String },
}

impl ArtifactSource {
    /// Inline source for archives that fit the inline upload limit.
    ///
    /// Larger archives must go through an [`ArtifactStore`](super::object_store::ArtifactStore).
    pub fn inline(artifact: &PackagedArtifact) -> Result<Self> {
        match artifact.upload_path() {
            UploadPath::Inline => Ok(Self::Inline {
                path: artifact.path.clone(),
            }),
            UploadPath::BulkObjectStore => Err(BenchError::Other(format!(
                "{} is {} bytes and must be uploaded to the object store",
                artifact.path.display(),
                artifact.size_bytes
            ))),
        }
    }

    pub fn matches(&self, package_type: PackageType) -> bool {
        match self {
            Self::Image { .. } => package_type == PackageType::Image,
            Self::Inline { .. } | Self::ObjectStore { .. } => package_type == PackageType::Zip,
        }
    }
}

/// Fixed-interval retry budget for eventually consistent provider state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// Raw lifecycle calls against a provider.
///
/// Implementations return as soon as the provider accepts a call; they make
/// no promise that a following [`list_functions`](Self::list_functions)
/// reflects it. [`Provisioner`](crate::provisioning::Provisioner) layers the
/// quota and read-after-write guarantees on top.
pub trait FunctionConnection: Send + Sync {
    fn list_functions(
        &self,
    ) -> impl Future<Output = Result<Vec<FunctionDeploymentRecord>>> + Send;

    /// Creates a function fronted by a new gateway and returns the gateway id.
    fn deploy_function(
        &self,
        package_type: PackageType,
        runtime: Runtime,
        memory_mb: u32,
        artifact: &ArtifactSource,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Replaces code and memory of the function behind `gateway_id`.
    fn update_function(
        &self,
        package_type: PackageType,
        gateway_id: &str,
        memory_mb: u32,
        artifact: &ArtifactSource,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the gateway and the function behind it.
    fn remove_function(&self, gateway_id: &str) -> impl Future<Output = Result<()>> + Send;
}
