//! Provider-side deployment records and the policies applied to them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::experiment::SubExperimentConfig;
use crate::provider::{PackageType, ACCOUNT_FUNCTION_QUOTA};

/// A function deployed behind a gateway, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeploymentRecord {
    pub gateway_id: String,
    pub function_name: String,
    pub package_type: PackageType,
    pub image_size_mb: f64,
    pub memory_mb: u32,
}

/// Outcome of checking the account quota before one more deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eviction<'a> {
    /// The account is below its ceiling.
    NotNeeded,
    /// Remove this record first.
    Victim(&'a FunctionDeploymentRecord),
    /// The account is at its ceiling and every record is protected.
    NoCandidate,
}

/// At the ceiling, picks the first-listed record that is not `protected`, so
/// that repeated runs against the same account evict in the same order and a
/// gateway already handed out is never removed.
pub fn select_eviction_victim<'a>(
    records: &'a [FunctionDeploymentRecord],
    protected: &HashSet<String>,
) -> Eviction<'a> {
    if records.len() < ACCOUNT_FUNCTION_QUOTA {
        return Eviction::NotNeeded;
    }
    records
        .iter()
        .find(|record| !protected.contains(&record.gateway_id))
        .map_or(Eviction::NoCandidate, Eviction::Victim)
}

/// What the setup phase does to obtain one gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionAction {
    /// Repurpose an already deployed function with the new artifact and memory.
    Update { gateway_id: String },
    /// Deploy a fresh function.
    Deploy,
}

/// Per sub-experiment, in configuration order, one action per requested gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub sub_experiments: Vec<Vec<FunctionAction>>,
}

impl AllocationPlan {
    pub fn deploy_count(&self) -> usize {
        self.actions()
            .filter(|action| matches!(action, FunctionAction::Deploy))
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.actions()
            .filter(|action| matches!(action, FunctionAction::Update { .. }))
            .count()
    }

    /// Existing gateways the plan repurposes.
    pub fn claimed_gateways(&self) -> HashSet<String> {
        self.actions()
            .filter_map(|action| match action {
                FunctionAction::Update { gateway_id } => Some(gateway_id.clone()),
                FunctionAction::Deploy => None,
            })
            .collect()
    }

    fn actions(&self) -> impl Iterator<Item = &FunctionAction> {
        self.sub_experiments.iter().flatten()
    }
}

/// Reuse existing functions of the matching package type, in listing order,
/// before deploying new ones. Each existing function serves at most one gateway.
pub fn plan_function_allocation(
    existing: &[FunctionDeploymentRecord],
    configs: &[SubExperimentConfig],
) -> AllocationPlan {
    let mut claimed: HashSet<&str> = HashSet::new();

    let sub_experiments = configs
        .iter()
        .map(|config| {
            (0..config.gateways_number)
                .map(|_| {
                    let reusable = existing.iter().find(|record| {
                        record.package_type == config.package_type
                            && !claimed.contains(record.gateway_id.as_str())
                    });
                    match reusable {
                        Some(record) => {
                            claimed.insert(record.gateway_id.as_str());
                            FunctionAction::Update {
                                gateway_id: record.gateway_id.clone(),
                            }
                        }
                        None => FunctionAction::Deploy,
                    }
                })
                .collect()
        })
        .collect();

    AllocationPlan { sub_experiments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{IatType, DEFAULT_FUNCTION_MEMORY_MB, DEFAULT_VISUALIZATION};

    fn record(gateway_id: &str, package_type: PackageType) -> FunctionDeploymentRecord {
        FunctionDeploymentRecord {
            gateway_id: gateway_id.to_string(),
            function_name: format!("fn-{gateway_id}"),
            package_type,
            image_size_mb: 1.0,
            memory_mb: 128,
        }
    }

    fn config(package_type: PackageType, gateways_number: usize) -> SubExperimentConfig {
        SubExperimentConfig {
            title: String::new(),
            bursts: 1,
            burst_sizes: vec![1],
            payload_length_bytes: 0,
            iat_seconds: 1.0,
            iat_type: IatType::Deterministic,
            function_increment_limits: Vec::new(),
            package_type,
            gateways_number,
            visualization: DEFAULT_VISUALIZATION.to_string(),
            function_memory_mb: DEFAULT_FUNCTION_MEMORY_MB,
            function_image_size_mb: 0.0,
        }
    }

    #[test]
    fn no_victim_below_quota() {
        let records: Vec<_> = (0..ACCOUNT_FUNCTION_QUOTA - 1)
            .map(|index| record(&format!("gw{index}"), PackageType::Zip))
            .collect();
        assert_eq!(
            select_eviction_victim(&records, &HashSet::new()),
            Eviction::NotNeeded
        );
    }

    #[test]
    fn evicts_first_listed_at_quota() {
        let records: Vec<_> = (0..ACCOUNT_FUNCTION_QUOTA)
            .map(|index| record(&format!("gw{index}"), PackageType::Zip))
            .collect();
        match select_eviction_victim(&records, &HashSet::new()) {
            Eviction::Victim(victim) => assert_eq!(victim.gateway_id, "gw0"),
            other => panic!("expected a victim, got {other:?}"),
        }
    }

    #[test]
    fn skips_protected_records_when_evicting() {
        let records: Vec<_> = (0..ACCOUNT_FUNCTION_QUOTA)
            .map(|index| record(&format!("gw{index}"), PackageType::Zip))
            .collect();
        let protected: HashSet<String> = ["gw0".to_string(), "gw1".to_string()].into();

        match select_eviction_victim(&records, &protected) {
            Eviction::Victim(victim) => assert_eq!(victim.gateway_id, "gw2"),
            other => panic!("expected a victim, got {other:?}"),
        }

        let everything: HashSet<String> =
            records.iter().map(|record| record.gateway_id.clone()).collect();
        assert_eq!(
            select_eviction_victim(&records, &everything),
            Eviction::NoCandidate
        );
    }

    #[test]
    fn reuses_matching_functions_then_deploys() {
        let existing = vec![
            record("zip-a", PackageType::Zip),
            record("image-a", PackageType::Image),
            record("zip-b", PackageType::Zip),
        ];
        let configs = vec![config(PackageType::Zip, 1), config(PackageType::Zip, 2)];

        let plan = plan_function_allocation(&existing, &configs);

        assert_eq!(
            plan.sub_experiments,
            vec![
                vec![FunctionAction::Update {
                    gateway_id: "zip-a".to_string()
                }],
                vec![
                    FunctionAction::Update {
                        gateway_id: "zip-b".to_string()
                    },
                    FunctionAction::Deploy,
                ],
            ]
        );
        assert_eq!(plan.update_count(), 2);
        assert_eq!(plan.deploy_count(), 1);
        assert_eq!(
            plan.claimed_gateways(),
            HashSet::from(["zip-a".to_string(), "zip-b".to_string()])
        );
    }

    #[test]
    fn image_experiments_never_claim_zip_functions() {
        let existing = vec![record("zip-a", PackageType::Zip)];
        let plan = plan_function_allocation(&existing, &[config(PackageType::Image, 1)]);
        assert_eq!(plan.sub_experiments, vec![vec![FunctionAction::Deploy]]);
    }
}
