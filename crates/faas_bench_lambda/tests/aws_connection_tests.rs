//! Live tests against a real AWS account. Run with `cargo xtask live-test`;
//! they need credentials, `FAAS_BENCH_LAMBDA_ROLE_ARN`, and optionally
//! `AWS_REGION`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use faas_bench_core::provider::{PackageType, Runtime};
use faas_bench_core::sizing::mebibytes_to_bytes;
use faas_bench_lambda::adapters::aws_connection::{AwsConnection, AwsConnectionSettings};
use faas_bench_lambda::adapters::connection::{ArtifactSource, FunctionConnection, RetryPolicy};
use faas_bench_lambda::adapters::session::{AwsSession, DEFAULT_REGION};
use faas_bench_lambda::packaging::Packager;
use faas_bench_lambda::provisioning::Provisioner;

const HANDLER_SOURCE: &str = r#"import json

def lambda_handler(event, context):
    return {
        "statusCode": 200,
        "body": json.dumps({"AwsRequestID": context.aws_request_id}),
    }
"#;

fn live_provisioner() -> Provisioner<AwsConnection> {
    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());
    let session = Arc::new(AwsSession::new(region));
    let settings = AwsConnectionSettings {
        lambda_role_arn: Some(
            std::env::var("FAAS_BENCH_LAMBDA_ROLE_ARN").expect("FAAS_BENCH_LAMBDA_ROLE_ARN set"),
        ),
        function_name_prefix: "faas-bench-live-test-".to_string(),
        ..AwsConnectionSettings::default()
    };
    Provisioner::new(
        AwsConnection::new(session, settings),
        RetryPolicy {
            attempts: 60,
            interval: Duration::from_secs(2),
        },
    )
}

#[tokio::test]
#[ignore = "deploys real functions; run with `cargo xtask live-test`"]
async fn deploy_update_and_remove_a_padded_function() {
    let dir = tempfile::tempdir().expect("tempdir");
    let function_dir = dir.path().join("echo");
    std::fs::create_dir_all(&function_dir).expect("function dir");
    std::fs::write(function_dir.join("main.py"), HANDLER_SOURCE).expect("handler source");

    let artifact = Packager::new(dir.path())
        .package(0, Runtime::Python39, "echo", mebibytes_to_bytes(45.0))
        .expect("package");
    let source = ArtifactSource::inline(&artifact).expect("45 MB archive fits inline");

    let provisioner = live_provisioner();
    let gateway_id = provisioner
        .deploy(PackageType::Zip, Runtime::Python39, 256, &source, &HashSet::new())
        .await
        .expect("deploy");

    let listed = provisioner.list().await.expect("list after deploy");
    let deployed = listed
        .iter()
        .find(|record| record.gateway_id == gateway_id)
        .expect("deployed function is listed");
    assert_eq!(deployed.memory_mb, 256);
    assert_eq!(deployed.package_type, PackageType::Zip);
    assert!((deployed.image_size_mb - 45.0).abs() < 0.5);

    provisioner
        .update(PackageType::Zip, &gateway_id, 512, &source)
        .await
        .expect("update");
    let updated = provisioner
        .connection()
        .list_functions()
        .await
        .expect("list after update");
    assert!(updated
        .iter()
        .any(|record| record.gateway_id == gateway_id && record.memory_mb == 512));

    provisioner.remove(&gateway_id).await.expect("remove");
    let remaining = provisioner.list().await.expect("list after remove");
    assert!(remaining.iter().all(|record| record.gateway_id != gateway_id));
}
