//! AWS side of the FaaS latency benchmark: archive packaging, function
//! provisioning behind REST gateways, and the open-loop burst client.

pub mod adapters;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod logging;
pub mod packaging;
pub mod provisioning;
pub mod recorder;

pub use error::{BenchError, Result};
