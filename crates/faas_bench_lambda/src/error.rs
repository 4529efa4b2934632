//! Errors raised while packaging, provisioning, or running experiments.

use faas_bench_core::{ConfigError, SizingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error on {path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A provider call failed or returned an unusable response.
    #[error("provider call `{operation}` failed: {message}")]
    Provider { operation: String, message: String },

    /// Provider state never converged to what a completed call promised.
    #[error("provider state did not converge: {0}")]
    Consistency(String),

    /// A deployment needs room under the function quota, but every deployed
    /// function already backs a gateway of the current setup.
    #[error("function quota of {quota} reached and no deployed function can be evicted")]
    QuotaExhausted { quota: usize },

    #[error("{0}")]
    Other(String),
}

impl BenchError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn zip(path: impl AsRef<std::path::Path>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
