use thiserror::Error;

/// Failure to reach a requested artifact size.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error(
        "total size (~{target_mb:.2}MB, {target_bytes} bytes) cannot be smaller than zipped binary size (~{current_mb:.2}MB, {current_bytes} bytes)"
    )]
    TargetBelowCurrent {
        current_bytes: u64,
        target_bytes: u64,
        current_mb: f64,
        target_mb: f64,
    },
}

/// Invalid or inconsistent experiment configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("could not decode experiment configuration: {0}")]
    Decode(String),

    #[error("sub-experiment {index} (`{title}`): {message}")]
    InvalidSubExperiment {
        index: usize,
        title: String,
        message: String,
    },

    #[error(
        "gateway pool exhausted: sub-experiment {index} needs {requested} gateways starting at position {offset}, but the pool only holds {available}"
    )]
    GatewayPoolExhausted {
        index: usize,
        requested: usize,
        offset: usize,
        available: usize,
    },

    #[error("selected experiment {selected} is invalid: only {available} sub-experiments are defined")]
    InvalidSelection { selected: usize, available: usize },
}
