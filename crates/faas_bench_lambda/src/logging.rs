use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::{BenchError, Result};

pub const RUN_LOG_FILE_NAME: &str = "run_logs.txt";

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`; when
/// a log file is given every line is written to it as well as to stdout.
pub fn init_logging(default_level: &str, log_file: Option<File>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|error| BenchError::Other(format!("invalid log level `{default_level}`: {error}")))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match log_file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(std::io::stdout.and(Arc::new(file)))
            .try_init(),
        None => builder.try_init(),
    };
    installed.map_err(|error| BenchError::Other(format!("failed to install logger: {error}")))
}
