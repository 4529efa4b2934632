//! Gateway pool handed from the setup phase to the client.

use std::path::Path;

use faas_bench_core::experiment::GatewayEndpoint;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct GatewayRow {
    #[serde(rename = "Gateway ID")]
    gateway_id: String,
}

pub fn write_gateway_pool(path: &Path, gateways: &[GatewayEndpoint]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| BenchError::io(parent, error))?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for gateway in gateways {
        writer.serialize(GatewayRow {
            gateway_id: gateway.as_str().to_string(),
        })?;
    }
    writer.flush().map_err(|error| BenchError::io(path, error))?;
    Ok(())
}

pub fn read_gateway_pool(path: &Path) -> Result<Vec<GatewayEndpoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize::<GatewayRow>()
        .map(|row| Ok(GatewayEndpoint::new(row?.gateway_id)))
        .collect()
}
