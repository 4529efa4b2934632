use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_lambda::config::Credentials;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub const DEFAULT_REGION: &str = "us-west-1";
pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

/// Authentication context shared by every AWS client of a process.
///
/// Credentials are read from the environment the first time a client needs
/// them and reused afterwards. A missing variable only produces a warning; the
/// provider rejects the empty credential on the first call instead.
#[derive(Debug)]
pub struct AwsSession {
    region: String,
    config: OnceCell<SdkConfig>,
}

impl AwsSession {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            config: OnceCell::new(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub async fn sdk_config(&self) -> &SdkConfig {
        self.config.get_or_init(|| self.load()).await
    }

    async fn load(&self) -> SdkConfig {
        debug!(region = %self.region, "Initialising AWS credentials");
        let credentials = Credentials::new(
            env_credential(ACCESS_KEY_ID_VAR),
            env_credential(SECRET_ACCESS_KEY_VAR),
            None,
            None,
            "environment",
        );

        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await
    }
}

fn env_credential(key: &str) -> String {
    match std::env::var(key) {
        Ok(value) => value,
        Err(_) => {
            warn!("Environment variable {key} is not set.");
            String::new()
        }
    }
}
