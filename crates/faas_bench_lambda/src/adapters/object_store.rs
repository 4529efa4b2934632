use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::sync::OnceCell;
use tracing::info;

use super::connection::ArtifactSource;
use super::session::AwsSession;
use crate::error::{BenchError, Result};

/// Bulk storage for archives too large to send inline.
pub trait ArtifactStore: Send + Sync {
    fn upload_artifact(
        &self,
        key: &str,
        path: &Path,
    ) -> impl Future<Output = Result<ArtifactSource>> + Send;
}

pub struct S3ArtifactStore {
    session: Arc<AwsSession>,
    bucket: String,
    client: OnceCell<aws_sdk_s3::Client>,
}

impl S3ArtifactStore {
    pub fn new(session: Arc<AwsSession>, bucket: impl Into<String>) -> Self {
        Self {
            session,
            bucket: bucket.into(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &aws_sdk_s3::Client {
        self.client
            .get_or_init(|| async { aws_sdk_s3::Client::new(self.session.sdk_config().await) })
            .await
    }
}

impl ArtifactStore for S3ArtifactStore {
    async fn upload_artifact(&self, key: &str, path: &Path) -> Result<ArtifactSource> {
        let body = ByteStream::from_path(path).await.map_err(|error| {
            BenchError::provider(
                "PutObject",
                format!("failed to stream {}: {error}", path.display()),
            )
        })?;

        info!(bucket = %self.bucket, key, "Uploading archive to object store");
        self.client()
            .await
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|error| BenchError::provider("PutObject", DisplayErrorContext(error).to_string()))?;

        Ok(ArtifactSource::ObjectStore {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }
}
