//! Provider and runtime families the benchmark knows how to deploy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sizing::BYTES_PER_MEBIBYTE;

/// Maximum number of functions the benchmark keeps deployed per account.
pub const ACCOUNT_FUNCTION_QUOTA: usize = 600;

/// Largest archive the provider accepts inline; anything bigger is deployed
/// from bulk object storage.
pub const INLINE_UPLOAD_LIMIT_BYTES: u64 = 50 * BYTES_PER_MEBIBYTE;

/// Stage every gateway is deployed to.
pub const GATEWAY_STAGE: &str = "prod";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "aws")]
    Aws,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
        }
    }

    /// Public URL of a deployed gateway.
    pub fn gateway_endpoint_url(self, gateway_id: &str, region: &str) -> String {
        match self {
            Self::Aws => {
                format!("https://{gateway_id}.execute-api.{region}.amazonaws.com/{GATEWAY_STAGE}")
            }
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PackageType {
    #[default]
    Zip,
    Image,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "Zip",
            Self::Image => "Image",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "python3.9")]
    Python39,
    #[default]
    #[serde(rename = "go1.x")]
    Go1x,
    #[serde(rename = "nodejs18.x")]
    NodeJs18,
    #[serde(rename = "ruby3.2")]
    Ruby32,
    #[serde(rename = "java11")]
    Java11,
}

/// How a runtime's deployable archive is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingStrategy {
    /// Zip the runtime's entry point together with a filler file.
    General { entry_point: &'static str },
    /// Grow an archive that an external build step already produced.
    PrebuiltArchive,
}

impl Runtime {
    /// Identifier the provider uses for this runtime.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python39 => "python3.9",
            Self::Go1x => "go1.x",
            Self::NodeJs18 => "nodejs18.x",
            Self::Ruby32 => "ruby3.2",
            Self::Java11 => "java11",
        }
    }

    pub fn packaging_strategy(self) -> PackagingStrategy {
        match self {
            Self::Python39 => PackagingStrategy::General {
                entry_point: "main.py",
            },
            Self::Go1x => PackagingStrategy::General {
                entry_point: "bootstrap",
            },
            Self::NodeJs18 => PackagingStrategy::General {
                entry_point: "index.js",
            },
            Self::Ruby32 => PackagingStrategy::General {
                entry_point: "function.rb",
            },
            Self::Java11 => PackagingStrategy::PrebuiltArchive,
        }
    }

    /// Handler the function is configured with when deployed from an archive.
    pub fn handler(self) -> &'static str {
        match self {
            Self::Python39 => "main.lambda_handler",
            Self::Go1x => "bootstrap",
            Self::NodeJs18 => "index.handler",
            Self::Ruby32 => "function.lambda_handler",
            Self::Java11 => "benchmark.Handler::handleRequest",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an archive travels on its way to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    Inline,
    BulkObjectStore,
}

pub fn select_upload_path(archive_size_bytes: u64) -> UploadPath {
    if archive_size_bytes > INLINE_UPLOAD_LIMIT_BYTES {
        UploadPath::BulkObjectStore
    } else {
        UploadPath::Inline
    }
}
