//! Quota-aware, read-after-write consistent lifecycle operations.
//!
//! Each operation returns only once a fresh listing reflects it, so the
//! next operation (and the next eviction decision) sees the state the
//! previous one produced.

use std::collections::HashSet;

use faas_bench_core::deployment::{select_eviction_victim, Eviction, FunctionDeploymentRecord};
use faas_bench_core::provider::{PackageType, Runtime, ACCOUNT_FUNCTION_QUOTA};
use tracing::{debug, info, warn};

use crate::adapters::connection::{ArtifactSource, FunctionConnection, RetryPolicy};
use crate::error::{BenchError, Result};

pub struct Provisioner<C> {
    connection: C,
    consistency: RetryPolicy,
}

impl<C: FunctionConnection> Provisioner<C> {
    pub fn new(connection: C, consistency: RetryPolicy) -> Self {
        Self {
            connection,
            consistency,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub async fn list(&self) -> Result<Vec<FunctionDeploymentRecord>> {
        let records = self.connection.list_functions().await?;
        if records.len() > ACCOUNT_FUNCTION_QUOTA {
            warn!(
                count = records.len(),
                quota = ACCOUNT_FUNCTION_QUOTA,
                "Account holds more functions than the benchmark quota"
            );
        }
        Ok(records)
    }

    /// Deploys a new function, evicting the first-listed unprotected one when
    /// the account is at its quota. Returns the new gateway id.
    pub async fn deploy(
        &self,
        package_type: PackageType,
        runtime: Runtime,
        memory_mb: u32,
        artifact: &ArtifactSource,
        protected: &HashSet<String>,
    ) -> Result<String> {
        let records = self.list().await?;
        match select_eviction_victim(&records, protected) {
            Eviction::NotNeeded => {}
            Eviction::Victim(victim) => {
                info!(
                    gateway_id = %victim.gateway_id,
                    function_name = %victim.function_name,
                    "Function quota reached, evicting first listed function"
                );
                self.remove(&victim.gateway_id).await?;
            }
            Eviction::NoCandidate => {
                return Err(BenchError::QuotaExhausted {
                    quota: ACCOUNT_FUNCTION_QUOTA,
                });
            }
        }

        let gateway_id = self
            .connection
            .deploy_function(package_type, runtime, memory_mb, artifact)
            .await?;
        self.await_listing("deploy", &gateway_id, |records| {
            records.iter().any(|record| {
                record.gateway_id == gateway_id
                    && record.package_type == package_type
                    && record.memory_mb == memory_mb
            })
        })
        .await?;
        Ok(gateway_id)
    }

    pub async fn update(
        &self,
        package_type: PackageType,
        gateway_id: &str,
        memory_mb: u32,
        artifact: &ArtifactSource,
    ) -> Result<()> {
        self.connection
            .update_function(package_type, gateway_id, memory_mb, artifact)
            .await?;
        self.await_listing("update", gateway_id, |records| {
            records
                .iter()
                .any(|record| record.gateway_id == gateway_id && record.memory_mb == memory_mb)
        })
        .await
    }

    pub async fn remove(&self, gateway_id: &str) -> Result<()> {
        self.connection.remove_function(gateway_id).await?;
        self.await_listing("remove", gateway_id, |records| {
            records.iter().all(|record| record.gateway_id != gateway_id)
        })
        .await
    }

    async fn await_listing(
        &self,
        operation: &str,
        gateway_id: &str,
        reflected: impl Fn(&[FunctionDeploymentRecord]) -> bool,
    ) -> Result<()> {
        for attempt in 1..=self.consistency.attempts {
            let records = self.connection.list_functions().await?;
            if reflected(&records) {
                return Ok(());
            }
            debug!(operation, gateway_id, attempt, "Listing does not reflect the change yet");
            tokio::time::sleep(self.consistency.interval).await;
        }

        Err(BenchError::Consistency(format!(
            "{operation} of {gateway_id} not visible after {} listings",
            self.consistency.attempts
        )))
    }
}
