//! Shared serverless benchmark domain primitives.
//!
//! This crate owns the deterministic parts of the benchmark: artifact sizing,
//! the provider/runtime table, experiment configuration and gateway
//! partitioning, burst scheduling, deployment-record policy, and latency
//! samples. AWS SDK, HTTP, and async runtime code lives in `faas_bench_lambda`.

pub mod deployment;
pub mod error;
pub mod experiment;
pub mod latency;
pub mod provider;
pub mod schedule;
pub mod sizing;

pub use error::{ConfigError, SizingError};
