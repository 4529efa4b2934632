//! Experiment configuration: decoding, defaulting, and gateway assignment.
//!
//! A configuration file is decoded into [`ExperimentConfiguration`], normalised
//! into [`Configuration`] (defaults filled, values checked), and finally each
//! sub-experiment is frozen into a [`SubExperiment`] once it has an id and its
//! slice of the gateway pool.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::provider::{PackageType, Provider, Runtime};
use crate::sizing::mebibytes_to_bytes;

pub const DEFAULT_VISUALIZATION: &str = "cdf";
pub const DEFAULT_GATEWAYS_NUMBER: usize = 1;
pub const DEFAULT_FUNCTION_MEMORY_MB: u32 = 128;
pub const MANY_REQUESTS_IN_BURST_WARN_THRESHOLD: usize = 2_000;
/// Longest accepted inter-arrival time: one day.
pub const MAX_IAT_SECONDS: f64 = 86_400.0;

/// Inter-arrival mode between consecutive bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IatType {
    Deterministic,
    #[default]
    Stochastic,
}

/// Configuration file as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExperimentConfiguration {
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub sub_experiments: Vec<SubExperimentDefinition>,
}

/// One sub-experiment as written by the user; optional fields have defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubExperimentDefinition {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub bursts: usize,
    #[serde(default)]
    pub burst_sizes: Vec<usize>,
    #[serde(default)]
    pub payload_length_bytes: usize,
    #[serde(default, rename = "IATSeconds")]
    pub iat_seconds: f64,
    #[serde(default, rename = "IATType")]
    pub iat_type: Option<IatType>,
    #[serde(default)]
    pub function_increment_limits: Vec<u64>,
    #[serde(default)]
    pub package_type: Option<PackageType>,
    #[serde(default)]
    pub gateways_number: Option<usize>,
    #[serde(default)]
    pub visualization: Option<String>,
    #[serde(default, rename = "FunctionMemoryMB")]
    pub function_memory_mb: Option<u32>,
    #[serde(default, rename = "FunctionImageSizeMB")]
    pub function_image_size_mb: f64,
}

/// Normalised configuration with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub sequential: bool,
    pub provider: Provider,
    pub runtime: Runtime,
    pub sub_experiments: Vec<SubExperimentConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubExperimentConfig {
    pub title: String,
    pub bursts: usize,
    pub burst_sizes: Vec<usize>,
    pub payload_length_bytes: usize,
    pub iat_seconds: f64,
    pub iat_type: IatType,
    pub function_increment_limits: Vec<u64>,
    pub package_type: PackageType,
    pub gateways_number: usize,
    pub visualization: String,
    pub function_memory_mb: u32,
    pub function_image_size_mb: f64,
}

impl SubExperimentConfig {
    /// Requests fired in `burst_id`; the last configured size repeats.
    pub fn burst_size(&self, burst_id: usize) -> usize {
        repeat_last(&self.burst_sizes, burst_id).unwrap_or(0)
    }

    /// Busy-loop bound forwarded to the function for `burst_id`, if configured.
    pub fn increment_limit(&self, burst_id: usize) -> Option<u64> {
        repeat_last(&self.function_increment_limits, burst_id)
    }

    /// Target archive size; `0` keeps the natural size.
    pub fn target_image_size_bytes(&self) -> u64 {
        mebibytes_to_bytes(self.function_image_size_mb)
    }
}

fn repeat_last<T: Copy>(values: &[T], index: usize) -> Option<T> {
    values.get(index).or_else(|| values.last()).copied()
}

/// Opaque identifier of a deployed gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayEndpoint(String);

impl GatewayEndpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sub-experiment frozen with its position in the configuration and its
/// slice of the gateway pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SubExperiment {
    pub id: usize,
    pub config: SubExperimentConfig,
    pub gateway_endpoints: Vec<GatewayEndpoint>,
}

impl SubExperiment {
    /// Gateway serving the `request_index`-th request of a burst.
    pub fn gateway_for_request(&self, request_index: usize) -> Option<&GatewayEndpoint> {
        if self.gateway_endpoints.is_empty() {
            return None;
        }
        self.gateway_endpoints
            .get(request_index % self.gateway_endpoints.len())
    }

    /// Directory-safe label such as `0_warm-python`.
    pub fn label(&self) -> String {
        let title: String = self
            .config
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        if title.is_empty() {
            self.id.to_string()
        } else {
            format!("{}_{title}", self.id)
        }
    }
}

/// Which sub-experiments a run launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExperimentSelection {
    #[default]
    All,
    Only(usize),
}

impl ExperimentSelection {
    /// Interpret a command-line index where `-1` selects every sub-experiment.
    pub fn from_flag(flag: i64) -> Result<Self, String> {
        match flag {
            -1 => Ok(Self::All),
            index if index >= 0 => Ok(Self::Only(index as usize)),
            other => Err(format!("Parameter `runExperiment` is invalid: {other}")),
        }
    }

    pub fn select(self, experiments: Vec<SubExperiment>) -> Result<Vec<SubExperiment>, ConfigError> {
        match self {
            Self::All => Ok(experiments),
            Self::Only(index) => {
                let available = experiments.len();
                experiments
                    .into_iter()
                    .nth(index)
                    .map(|experiment| vec![experiment])
                    .ok_or(ConfigError::InvalidSelection {
                        selected: index,
                        available,
                    })
            }
        }
    }
}

pub fn parse_configuration(bytes: &[u8]) -> Result<Configuration, ConfigError> {
    let raw: ExperimentConfiguration =
        serde_json::from_slice(bytes).map_err(|error| ConfigError::Decode(error.to_string()))?;
    normalize_configuration(raw)
}

pub fn normalize_configuration(raw: ExperimentConfiguration) -> Result<Configuration, ConfigError> {
    let sub_experiments = raw
        .sub_experiments
        .into_iter()
        .enumerate()
        .map(|(index, definition)| normalize_sub_experiment(index, definition))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        count = sub_experiments.len(),
        "Extracted sub-experiments from given configuration file"
    );

    Ok(Configuration {
        sequential: raw.sequential,
        provider: raw.provider.unwrap_or_default(),
        runtime: raw.runtime.unwrap_or_default(),
        sub_experiments,
    })
}

fn normalize_sub_experiment(
    index: usize,
    definition: SubExperimentDefinition,
) -> Result<SubExperimentConfig, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidSubExperiment {
        index,
        title: definition.title.clone(),
        message: message.to_string(),
    };

    if definition.bursts == 0 {
        return Err(invalid("Bursts must be a positive integer"));
    }
    if definition.burst_sizes.is_empty() {
        return Err(invalid("BurstSizes must be a non-empty list"));
    }
    if !definition.iat_seconds.is_finite() || definition.iat_seconds < 0.0 {
        return Err(invalid("IATSeconds must be a finite, non-negative number"));
    }
    if definition.iat_seconds > MAX_IAT_SECONDS {
        return Err(invalid("IATSeconds must not exceed one day (86400 seconds)"));
    }
    if !definition.function_image_size_mb.is_finite() || definition.function_image_size_mb < 0.0 {
        return Err(invalid("FunctionImageSizeMB must be a finite, non-negative number"));
    }
    if definition.gateways_number == Some(0) {
        return Err(invalid("GatewaysNumber must be a positive integer"));
    }
    if definition.function_memory_mb == Some(0) {
        return Err(invalid("FunctionMemoryMB must be a positive integer"));
    }

    if let Some(largest) = definition.burst_sizes.iter().max() {
        if *largest > MANY_REQUESTS_IN_BURST_WARN_THRESHOLD {
            warn!(
                sub_experiment = index,
                burst_size = largest,
                "Burst size exceeds {MANY_REQUESTS_IN_BURST_WARN_THRESHOLD} requests; the client may run out of sockets"
            );
        }
    }

    Ok(SubExperimentConfig {
        title: definition.title,
        bursts: definition.bursts,
        burst_sizes: definition.burst_sizes,
        payload_length_bytes: definition.payload_length_bytes,
        iat_seconds: definition.iat_seconds,
        iat_type: definition.iat_type.unwrap_or_default(),
        function_increment_limits: definition.function_increment_limits,
        package_type: definition.package_type.unwrap_or_default(),
        gateways_number: definition.gateways_number.unwrap_or(DEFAULT_GATEWAYS_NUMBER),
        visualization: definition
            .visualization
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_VISUALIZATION.to_string()),
        function_memory_mb: definition
            .function_memory_mb
            .unwrap_or(DEFAULT_FUNCTION_MEMORY_MB),
        function_image_size_mb: definition.function_image_size_mb,
    })
}

/// Give every sub-experiment its id and a disjoint, in-order slice of `pool`.
pub fn assign_gateways(
    configs: Vec<SubExperimentConfig>,
    pool: &[GatewayEndpoint],
) -> Result<Vec<SubExperiment>, ConfigError> {
    let mut cursor = 0usize;
    let mut experiments = Vec::with_capacity(configs.len());

    for (id, config) in configs.into_iter().enumerate() {
        let end = match cursor.checked_add(config.gateways_number) {
            Some(end) if end <= pool.len() => end,
            _ => {
                return Err(ConfigError::GatewayPoolExhausted {
                    index: id,
                    requested: config.gateways_number,
                    offset: cursor,
                    available: pool.len(),
                })
            }
        };

        experiments.push(SubExperiment {
            id,
            gateway_endpoints: pool[cursor..end].to_vec(),
            config,
        });
        cursor = end;
    }

    Ok(experiments)
}

/// Total gateways requested across the configuration.
pub fn required_gateways(configs: &[SubExperimentConfig]) -> usize {
    configs
        .iter()
        .fold(0usize, |total, config| total.saturating_add(config.gateways_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_gateways(gateways_number: usize) -> SubExperimentConfig {
        SubExperimentConfig {
            title: format!("needs-{gateways_number}"),
            bursts: 1,
            burst_sizes: vec![1],
            payload_length_bytes: 0,
            iat_seconds: 1.0,
            iat_type: IatType::Deterministic,
            function_increment_limits: Vec::new(),
            package_type: PackageType::Zip,
            gateways_number,
            visualization: DEFAULT_VISUALIZATION.to_string(),
            function_memory_mb: DEFAULT_FUNCTION_MEMORY_MB,
            function_image_size_mb: 0.0,
        }
    }

    fn pool(size: usize) -> Vec<GatewayEndpoint> {
        (0..size)
            .map(|index| GatewayEndpoint::new(format!("gw{index}")))
            .collect()
    }

    #[test]
    fn fills_documented_defaults() {
        let configuration = parse_configuration(
            br#"{
                "SubExperiments": [
                    {"Title": "warm", "Bursts": 3, "BurstSizes": [1, 5], "IATSeconds": 2.5}
                ]
            }"#,
        )
        .expect("configuration should parse");

        assert!(!configuration.sequential);
        assert_eq!(configuration.provider, Provider::Aws);
        assert_eq!(configuration.runtime, Runtime::Go1x);

        let sub = &configuration.sub_experiments[0];
        assert_eq!(sub.iat_type, IatType::Stochastic);
        assert_eq!(sub.package_type, PackageType::Zip);
        assert_eq!(sub.gateways_number, 1);
        assert_eq!(sub.function_memory_mb, 128);
        assert_eq!(sub.visualization, "cdf");
        assert_eq!(sub.target_image_size_bytes(), 0);
    }

    #[test]
    fn decodes_explicit_values() {
        let configuration = parse_configuration(
            br#"{
                "Sequential": true,
                "Provider": "aws",
                "Runtime": "python3.9",
                "SubExperiments": [{
                    "Title": "cold",
                    "Bursts": 2,
                    "BurstSizes": [10],
                    "PayloadLengthBytes": 64,
                    "IATSeconds": 600,
                    "IATType": "deterministic",
                    "PackageType": "Image",
                    "GatewaysNumber": 4,
                    "FunctionMemoryMB": 512,
                    "FunctionImageSizeMB": 45,
                    "FunctionIncrementLimits": [100, 200]
                }]
            }"#,
        )
        .expect("configuration should parse");

        assert!(configuration.sequential);
        assert_eq!(configuration.runtime, Runtime::Python39);
        let sub = &configuration.sub_experiments[0];
        assert_eq!(sub.iat_type, IatType::Deterministic);
        assert_eq!(sub.package_type, PackageType::Image);
        assert_eq!(sub.gateways_number, 4);
        assert_eq!(sub.function_memory_mb, 512);
        assert_eq!(sub.target_image_size_bytes(), 45 * 1024 * 1024);
        assert_eq!(sub.increment_limit(0), Some(100));
        assert_eq!(sub.increment_limit(7), Some(200));
    }

    #[test]
    fn rejects_malformed_json() {
        let error = parse_configuration(b"{\"SubExperiments\": [").expect_err("should fail");
        assert!(matches!(error, ConfigError::Decode(_)));
    }

    #[test]
    fn rejects_sub_experiment_without_bursts() {
        let error = parse_configuration(br#"{"SubExperiments": [{"Title": "x", "BurstSizes": [1]}]}"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("Bursts must be a positive integer"));
    }

    #[test]
    fn burst_sizes_repeat_last_value() {
        let mut config = config_with_gateways(1);
        config.bursts = 4;
        config.burst_sizes = vec![2, 7];
        assert_eq!(config.burst_size(0), 2);
        assert_eq!(config.burst_size(1), 7);
        assert_eq!(config.burst_size(3), 7);
        assert_eq!(config.increment_limit(0), None);
    }

    #[test]
    fn partitions_pool_in_order_without_overlap() {
        let configs = vec![
            config_with_gateways(2),
            config_with_gateways(1),
            config_with_gateways(3),
        ];
        let pool = pool(8);

        let experiments = assign_gateways(configs, &pool).expect("pool is large enough");

        let ids: Vec<usize> = experiments.iter().map(|experiment| experiment.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        let concatenated: Vec<GatewayEndpoint> = experiments
            .iter()
            .flat_map(|experiment| experiment.gateway_endpoints.clone())
            .collect();
        assert_eq!(concatenated, pool[..6].to_vec());
        assert_eq!(experiments[1].gateway_endpoints, vec![GatewayEndpoint::new("gw2")]);
    }

    #[test]
    fn exhausted_pool_is_fatal() {
        let configs = vec![config_with_gateways(2), config_with_gateways(2)];
        let error = assign_gateways(configs, &pool(3)).expect_err("pool too small");
        assert_eq!(
            error,
            ConfigError::GatewayPoolExhausted {
                index: 1,
                requested: 2,
                offset: 2,
                available: 3,
            }
        );
    }

    #[test]
    fn oversized_gateway_request_exhausts_pool_instead_of_overflowing() {
        let configs = vec![config_with_gateways(1), config_with_gateways(usize::MAX)];
        let error = assign_gateways(configs, &pool(4)).expect_err("request cannot fit");
        assert_eq!(
            error,
            ConfigError::GatewayPoolExhausted {
                index: 1,
                requested: usize::MAX,
                offset: 1,
                available: 4,
            }
        );
        assert_eq!(
            required_gateways(&[config_with_gateways(1), config_with_gateways(usize::MAX)]),
            usize::MAX
        );
    }

    #[test]
    fn rejects_inter_arrival_time_beyond_one_day() {
        let error = parse_configuration(
            br#"{"SubExperiments": [{"Bursts": 2, "BurstSizes": [1], "IATSeconds": 1e20, "IATType": "deterministic"}]}"#,
        )
        .expect_err("should fail");
        assert!(error.to_string().contains("IATSeconds must not exceed one day"));

        let accepted = parse_configuration(
            br#"{"SubExperiments": [{"Bursts": 2, "BurstSizes": [1], "IATSeconds": 86400}]}"#,
        )
        .expect("one day is accepted");
        assert_eq!(accepted.sub_experiments[0].iat_seconds, MAX_IAT_SECONDS);
    }

    #[test]
    fn requests_rotate_across_gateways() {
        let experiments =
            assign_gateways(vec![config_with_gateways(2)], &pool(2)).expect("assignment");
        let experiment = &experiments[0];
        assert_eq!(experiment.gateway_for_request(0).map(GatewayEndpoint::as_str), Some("gw0"));
        assert_eq!(experiment.gateway_for_request(1).map(GatewayEndpoint::as_str), Some("gw1"));
        assert_eq!(experiment.gateway_for_request(2).map(GatewayEndpoint::as_str), Some("gw0"));
    }

    #[test]
    fn selection_picks_single_experiment() {
        let experiments = assign_gateways(
            vec![config_with_gateways(1), config_with_gateways(1)],
            &pool(2),
        )
        .expect("assignment");

        let selected = ExperimentSelection::from_flag(1)
            .expect("valid flag")
            .select(experiments.clone())
            .expect("index in range");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, 1);

        let error = ExperimentSelection::Only(5)
            .select(experiments)
            .expect_err("out of range");
        assert_eq!(
            error,
            ConfigError::InvalidSelection {
                selected: 5,
                available: 2
            }
        );
        assert!(ExperimentSelection::from_flag(-2).is_err());
        assert_eq!(ExperimentSelection::from_flag(-1), Ok(ExperimentSelection::All));
    }

    #[test]
    fn label_is_directory_safe() {
        let mut config = config_with_gateways(1);
        config.title = "warm / python 3".to_string();
        let experiments = assign_gateways(vec![config], &pool(1)).expect("assignment");
        assert_eq!(experiments[0].label(), "0_warm---python-3");
    }
}
