//! Lambda functions fronted by REST API gateways.
//!
//! Every benchmark function gets its own REST API named after the function, so
//! listing the account's REST APIs with the benchmark prefix is enough to
//! recover the gateway to function mapping without any local state.

use std::error::Error as StdError;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use aws_sdk_apigateway::operation::create_rest_api::CreateRestApiError;
use aws_sdk_apigateway::operation::delete_rest_api::DeleteRestApiError;
use aws_sdk_apigateway::types::{EndpointConfiguration, EndpointType, IntegrationType};
use aws_sdk_lambda::error::{DisplayErrorContext, SdkError};
use aws_sdk_lambda::operation::update_function_configuration::UpdateFunctionConfigurationError;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{
    FunctionCode, LastUpdateStatus, PackageType as LambdaPackageType, Runtime as LambdaRuntime,
    State,
};
use chrono::Utc;
use faas_bench_core::deployment::FunctionDeploymentRecord;
use faas_bench_core::provider::{PackageType, Runtime, GATEWAY_STAGE};
use faas_bench_core::sizing::bytes_to_mebibytes;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::connection::{ArtifactSource, FunctionConnection, RetryPolicy};
use super::session::AwsSession;
use crate::error::{BenchError, Result};

pub const DEFAULT_FUNCTION_NAME_PREFIX: &str = "faas-bench-";
pub const DEFAULT_FUNCTION_TIMEOUT_SECS: i32 = 60;
const GATEWAY_METHOD: &str = "ANY";
const INVOKE_PERMISSION_STATEMENT: &str = "faas-bench-gateway-invoke";
const REST_API_PAGE_SIZE: i32 = 500;

#[derive(Debug, Clone)]
pub struct AwsConnectionSettings {
    /// Execution role for new functions; only needed when deploying.
    pub lambda_role_arn: Option<String>,
    pub function_name_prefix: String,
    pub function_timeout_secs: i32,
    /// How long to wait for a function to leave the pending or updating state.
    pub readiness: RetryPolicy,
    /// Backoff for calls the provider throttles or rejects as conflicting.
    pub throttling: RetryPolicy,
}

impl Default for AwsConnectionSettings {
    fn default() -> Self {
        Self {
            lambda_role_arn: None,
            function_name_prefix: DEFAULT_FUNCTION_NAME_PREFIX.to_string(),
            function_timeout_secs: DEFAULT_FUNCTION_TIMEOUT_SECS,
            readiness: RetryPolicy::default(),
            throttling: RetryPolicy {
                attempts: 10,
                interval: std::time::Duration::from_secs(30),
            },
        }
    }
}

struct AwsClients {
    lambda: aws_sdk_lambda::Client,
    apigateway: aws_sdk_apigateway::Client,
}

pub struct AwsConnection {
    session: Arc<AwsSession>,
    settings: AwsConnectionSettings,
    clients: OnceCell<AwsClients>,
}

impl AwsConnection {
    pub fn new(session: Arc<AwsSession>, settings: AwsConnectionSettings) -> Self {
        Self {
            session,
            settings,
            clients: OnceCell::new(),
        }
    }

    async fn clients(&self) -> &AwsClients {
        self.clients
            .get_or_init(|| async {
                let config = self.session.sdk_config().await;
                AwsClients {
                    lambda: aws_sdk_lambda::Client::new(config),
                    apigateway: aws_sdk_apigateway::Client::new(config),
                }
            })
            .await
    }

    fn unique_function_name(&self) -> String {
        format!(
            "{}{}-{:08x}",
            self.settings.function_name_prefix,
            Utc::now().format("%Y%m%d%H%M%S"),
            rand::random::<u32>()
        )
    }

    async fn describe_function(
        &self,
        gateway_id: &str,
        function_name: &str,
    ) -> Result<Option<FunctionDeploymentRecord>> {
        let lambda = &self.clients().await.lambda;
        let configuration = match lambda
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
        {
            Ok(configuration) => configuration,
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_not_found_exception()) =>
            {
                warn!(gateway_id, function_name, "Gateway has no backing function");
                return Ok(None);
            }
            Err(error) => return Err(sdk_error("GetFunctionConfiguration", error)),
        };

        let package_type = match configuration.package_type() {
            Some(LambdaPackageType::Image) => PackageType::Image,
            _ => PackageType::Zip,
        };
        let image_size_mb = match package_type {
            PackageType::Zip => bytes_to_mebibytes(configuration.code_size().max(0) as u64),
            PackageType::Image => 0.0,
        };

        Ok(Some(FunctionDeploymentRecord {
            gateway_id: gateway_id.to_string(),
            function_name: function_name.to_string(),
            package_type,
            image_size_mb,
            memory_mb: configuration.memory_size().unwrap_or_default().max(0) as u32,
        }))
    }

    async fn function_name_for_gateway(&self, gateway_id: &str) -> Result<String> {
        let api = self
            .clients()
            .await
            .apigateway
            .get_rest_api()
            .rest_api_id(gateway_id)
            .send()
            .await
            .map_err(|error| sdk_error("GetRestApi", error))?;
        api.name()
            .map(str::to_string)
            .ok_or_else(|| BenchError::provider("GetRestApi", format!("gateway {gateway_id} has no name")))
    }

    async fn wait_until_ready(&self, function_name: &str) -> Result<()> {
        let lambda = &self.clients().await.lambda;
        let policy = self.settings.readiness;

        for attempt in 1..=policy.attempts {
            let configuration = lambda
                .get_function_configuration()
                .function_name(function_name)
                .send()
                .await
                .map_err(|error| sdk_error("GetFunctionConfiguration", error))?;

            if matches!(configuration.state(), Some(State::Failed))
                || matches!(configuration.last_update_status(), Some(LastUpdateStatus::Failed))
            {
                let reason = configuration
                    .state_reason()
                    .or(configuration.last_update_status_reason())
                    .unwrap_or("no reason given");
                return Err(BenchError::provider(
                    "GetFunctionConfiguration",
                    format!("function {function_name} failed: {reason}"),
                ));
            }

            let pending = matches!(configuration.state(), Some(State::Pending));
            let updating = matches!(
                configuration.last_update_status(),
                Some(LastUpdateStatus::InProgress)
            );
            if !pending && !updating {
                return Ok(());
            }
            debug!(function_name, attempt, "Function is not ready yet");
            tokio::time::sleep(policy.interval).await;
        }

        Err(BenchError::Consistency(format!(
            "function {function_name} was not ready after {} attempts",
            policy.attempts
        )))
    }

    /// Creates the REST API in front of a function and returns its id.
    async fn create_gateway(&self, function_name: &str, function_arn: &str) -> Result<String> {
        let apigateway = &self.clients().await.apigateway;

        let api = retry_provider_call(
            self.settings.throttling,
            "CreateRestApi",
            CreateRestApiError::is_too_many_requests_exception,
            || {
                apigateway
                    .create_rest_api()
                    .name(function_name)
                    .description("FaaS latency benchmark gateway")
                    .endpoint_configuration(
                        EndpointConfiguration::builder()
                            .types(EndpointType::Regional)
                            .build(),
                    )
                    .send()
            },
        )
        .await?;
        let api_id = api
            .id()
            .ok_or_else(|| BenchError::provider("CreateRestApi", "response carried no id"))?
            .to_string();

        let configured = self.configure_gateway(&api_id, function_name, function_arn).await;
        rollback_on_error(configured, || async {
            warn!(gateway_id = %api_id, "Gateway setup failed, deleting the partial gateway");
            if let Err(error) = apigateway.delete_rest_api().rest_api_id(&api_id).send().await {
                warn!(
                    gateway_id = %api_id,
                    error = %DisplayErrorContext(error),
                    "Could not delete the partial gateway"
                );
            }
        })
        .await?;
        Ok(api_id)
    }

    /// Routes `ANY /` of the gateway to the function, deploys the stage, and
    /// lets the gateway invoke the function.
    async fn configure_gateway(&self, api_id: &str, function_name: &str, function_arn: &str) -> Result<()> {
        let clients = self.clients().await;
        let apigateway = &clients.apigateway;
        let region = self.session.region();

        let resources = apigateway
            .get_resources()
            .rest_api_id(api_id)
            .send()
            .await
            .map_err(|error| sdk_error("GetResources", error))?;
        let root_id = resources
            .items()
            .iter()
            .find(|resource| resource.path() == Some("/"))
            .and_then(|resource| resource.id())
            .ok_or_else(|| {
                BenchError::provider("GetResources", format!("gateway {api_id} has no root resource"))
            })?
            .to_string();

        apigateway
            .put_method()
            .rest_api_id(api_id)
            .resource_id(&root_id)
            .http_method(GATEWAY_METHOD)
            .authorization_type("NONE")
            .send()
            .await
            .map_err(|error| sdk_error("PutMethod", error))?;

        apigateway
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(&root_id)
            .http_method(GATEWAY_METHOD)
            .r#type(IntegrationType::AwsProxy)
            .integration_http_method("POST")
            .uri(format!(
                "arn:aws:apigateway:{region}:lambda:path/2015-03-31/functions/{function_arn}/invocations"
            ))
            .send()
            .await
            .map_err(|error| sdk_error("PutIntegration", error))?;

        apigateway
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(GATEWAY_STAGE)
            .send()
            .await
            .map_err(|error| sdk_error("CreateDeployment", error))?;

        let account_id = function_arn.split(':').nth(4).ok_or_else(|| {
            BenchError::provider("CreateFunction", format!("unexpected function ARN {function_arn}"))
        })?;
        clients
            .lambda
            .add_permission()
            .function_name(function_name)
            .statement_id(INVOKE_PERMISSION_STATEMENT)
            .action("lambda:InvokeFunction")
            .principal("apigateway.amazonaws.com")
            .source_arn(format!("arn:aws:execute-api:{region}:{account_id}:{api_id}/*"))
            .send()
            .await
            .map_err(|error| sdk_error("AddPermission", error))?;

        Ok(())
    }

    async fn delete_partial_function(&self, function_name: &str) {
        let lambda = &self.clients().await.lambda;
        if let Err(error) = lambda.delete_function().function_name(function_name).send().await {
            warn!(
                function_name,
                error = %DisplayErrorContext(error),
                "Could not delete the partially deployed function"
            );
        }
    }
}

impl FunctionConnection for AwsConnection {
    async fn list_functions(&self) -> Result<Vec<FunctionDeploymentRecord>> {
        let apigateway = &self.clients().await.apigateway;
        let mut records = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let page = apigateway
                .get_rest_apis()
                .limit(REST_API_PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|error| sdk_error("GetRestApis", error))?;

            for api in page.items() {
                let (Some(gateway_id), Some(name)) = (api.id(), api.name()) else {
                    continue;
                };
                if !name.starts_with(&self.settings.function_name_prefix) {
                    continue;
                }
                if let Some(record) = self.describe_function(gateway_id, name).await? {
                    records.push(record);
                }
            }

            match page.position() {
                Some(next) if !page.items().is_empty() => position = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(count = records.len(), "Listed deployed functions");
        Ok(records)
    }

    async fn deploy_function(
        &self,
        package_type: PackageType,
        runtime: Runtime,
        memory_mb: u32,
        artifact: &ArtifactSource,
    ) -> Result<String> {
        let role = self.settings.lambda_role_arn.as_deref().ok_or_else(|| {
            BenchError::Other("an execution role ARN is required to deploy functions".to_string())
        })?;
        ensure_artifact_matches(package_type, artifact)?;

        let function_name = self.unique_function_name();
        info!(
            function_name,
            %runtime,
            %package_type,
            memory_mb,
            "Deploying function"
        );

        let mut request = self
            .clients()
            .await
            .lambda
            .create_function()
            .function_name(&function_name)
            .role(role)
            .memory_size(memory_mb as i32)
            .timeout(self.settings.function_timeout_secs)
            .package_type(lambda_package_type(package_type))
            .code(function_code(artifact).await?);
        if package_type == PackageType::Zip {
            request = request
                .runtime(LambdaRuntime::from(runtime.as_str()))
                .handler(runtime.handler());
        }

        let created = request
            .send()
            .await
            .map_err(|error| sdk_error("CreateFunction", error))?;
        let function_arn = created
            .function_arn()
            .ok_or_else(|| BenchError::provider("CreateFunction", "response carried no function ARN"))?
            .to_string();

        let wired = match self.wait_until_ready(&function_name).await {
            Ok(()) => self.create_gateway(&function_name, &function_arn).await,
            Err(error) => Err(error),
        };
        let gateway_id = rollback_on_error(wired, || async {
            warn!(function_name, "Deployment failed, deleting the function");
            self.delete_partial_function(&function_name).await;
        })
        .await?;
        info!(function_name, gateway_id, "Function deployed");
        Ok(gateway_id)
    }

    async fn update_function(
        &self,
        package_type: PackageType,
        gateway_id: &str,
        memory_mb: u32,
        artifact: &ArtifactSource,
    ) -> Result<()> {
        ensure_artifact_matches(package_type, artifact)?;
        let function_name = self.function_name_for_gateway(gateway_id).await?;
        let lambda = &self.clients().await.lambda;
        info!(function_name, gateway_id, memory_mb, "Updating function");

        let request = lambda
            .update_function_code()
            .function_name(&function_name)
            .publish(true);
        let request = match artifact {
            ArtifactSource::Inline { path } => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|error| BenchError::io(path, error))?;
                request.zip_file(Blob::new(bytes))
            }
            ArtifactSource::ObjectStore { bucket, key } => request.s3_bucket(bucket).s3_key(key),
            ArtifactSource::Image { uri } => request.image_uri(uri),
        };
        request
            .send()
            .await
            .map_err(|error| sdk_error("UpdateFunctionCode", error))?;
        self.wait_until_ready(&function_name).await?;

        retry_provider_call(
            self.settings.throttling,
            "UpdateFunctionConfiguration",
            UpdateFunctionConfigurationError::is_resource_conflict_exception,
            || {
                lambda
                    .update_function_configuration()
                    .function_name(&function_name)
                    .memory_size(memory_mb as i32)
                    .send()
            },
        )
        .await?;
        self.wait_until_ready(&function_name).await
    }

    async fn remove_function(&self, gateway_id: &str) -> Result<()> {
        let function_name = self.function_name_for_gateway(gateway_id).await?;
        let clients = self.clients().await;
        info!(function_name, gateway_id, "Removing function");

        retry_provider_call(
            self.settings.throttling,
            "DeleteRestApi",
            DeleteRestApiError::is_too_many_requests_exception,
            || clients.apigateway.delete_rest_api().rest_api_id(gateway_id).send(),
        )
        .await?;

        match clients
            .lambda
            .delete_function()
            .function_name(&function_name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_not_found_exception()) =>
            {
                warn!(function_name, "Function was already deleted");
                Ok(())
            }
            Err(error) => Err(sdk_error("DeleteFunction", error)),
        }
    }
}

fn lambda_package_type(package_type: PackageType) -> LambdaPackageType {
    match package_type {
        PackageType::Zip => LambdaPackageType::Zip,
        PackageType::Image => LambdaPackageType::Image,
    }
}

fn ensure_artifact_matches(package_type: PackageType, artifact: &ArtifactSource) -> Result<()> {
    if artifact.matches(package_type) {
        Ok(())
    } else {
        Err(BenchError::Other(format!(
            "artifact {artifact:?} cannot back a {package_type} function"
        )))
    }
}

async fn function_code(artifact: &ArtifactSource) -> Result<FunctionCode> {
    let code = match artifact {
        ArtifactSource::Inline { path } => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|error| BenchError::io(path, error))?;
            FunctionCode::builder().zip_file(Blob::new(bytes)).build()
        }
        ArtifactSource::ObjectStore { bucket, key } => {
            FunctionCode::builder().s3_bucket(bucket).s3_key(key).build()
        }
        ArtifactSource::Image { uri } => FunctionCode::builder().image_uri(uri).build(),
    };
    Ok(code)
}

/// Runs `undo` when `result` is an error, then returns `result` unchanged.
async fn rollback_on_error<T, F, Fut>(result: Result<T>, undo: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    if result.is_err() {
        undo().await;
    }
    result
}

async fn retry_provider_call<T, E, R, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    is_retryable: fn(&E) -> bool,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, SdkError<E, R>>>,
    E: StdError + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(output) => return Ok(output),
            Err(error)
                if attempt < policy.attempts && error.as_service_error().is_some_and(is_retryable) =>
            {
                warn!(operation, attempt, "Provider asked to back off, retrying");
                attempt += 1;
                tokio::time::sleep(policy.interval).await;
            }
            Err(error) => return Err(sdk_error(operation, error)),
        }
    }
}

fn sdk_error<E, R>(operation: &str, error: SdkError<E, R>) -> BenchError
where
    E: StdError + 'static,
    R: Debug,
{
    BenchError::provider(operation, DisplayErrorContext(error).to_string())
}
