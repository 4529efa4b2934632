use std::future::Future;
use std::time::Duration;

use faas_bench_core::experiment::GatewayEndpoint;
use faas_bench_core::provider::Provider;
use serde::Deserialize;
use tracing::warn;

use crate::error::Result;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One request sent to a deployed gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub endpoint: GatewayEndpoint,
    pub payload_length_bytes: usize,
    pub increment_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationResponse {
    /// Identifier the function reported, if its response could be read.
    pub request_id: Option<String>,
}

/// Sends benchmark requests and reports the function's request identifier.
///
/// An `Err` means no response arrived; a response whose body cannot be
/// parsed is still `Ok` with no identifier.
pub trait GatewayInvoker: Send + Sync + 'static {
    fn invoke(
        &self,
        request: InvocationRequest,
    ) -> impl Future<Output = Result<InvocationResponse>> + Send;
}

#[derive(Debug, Deserialize)]
struct FunctionResponseBody {
    #[serde(rename = "AwsRequestID")]
    aws_request_id: String,
}

pub fn extract_request_id(body: &str) -> Option<String> {
    serde_json::from_str::<FunctionResponseBody>(body)
        .ok()
        .map(|parsed| parsed.aws_request_id)
}

/// Plain HTTPS client for gateways that require no request signing.
#[derive(Debug, Clone)]
pub struct HttpGatewayInvoker {
    client: reqwest::Client,
    provider: Provider,
    region: String,
}

impl HttpGatewayInvoker {
    pub fn new(provider: Provider, region: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            provider,
            region: region.into(),
        })
    }

    pub fn endpoint_url(&self, endpoint: &GatewayEndpoint) -> String {
        self.provider
            .gateway_endpoint_url(endpoint.as_str(), &self.region)
    }
}

impl GatewayInvoker for HttpGatewayInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        let mut query = vec![(
            "PayloadLengthBytes",
            request.payload_length_bytes.to_string(),
        )];
        if let Some(limit) = request.increment_limit {
            query.push(("IncrementLimit", limit.to_string()));
        }

        let response = self
            .client
            .get(self.endpoint_url(&request.endpoint))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(gateway = %request.endpoint, %status, "Gateway returned a non-success status");
        }
        let request_id = extract_request_id(&body);
        if request_id.is_none() {
            warn!(gateway = %request.endpoint, "Could not read request id from response body");
        }

        Ok(InvocationResponse { request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_request_id_from_function_body() {
        let body = r#"{"AwsRequestID":"3f2a-11","Payload":"xxxx"}"#;
        assert_eq!(extract_request_id(body), Some("3f2a-11".to_string()));
    }

    #[test]
    fn unreadable_bodies_yield_no_request_id() {
        assert_eq!(extract_request_id("Internal server error"), None);
        assert_eq!(extract_request_id(r#"{"message":"Forbidden"}"#), None);
        assert_eq!(extract_request_id(""), None);
    }

    #[test]
    fn endpoint_url_uses_provider_stage() {
        let invoker =
            HttpGatewayInvoker::new(Provider::Aws, "eu-west-1", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(
            invoker.endpoint_url(&GatewayEndpoint::new("abc123")),
            "https://abc123.execute-api.eu-west-1.amazonaws.com/prod"
        );
    }
}
