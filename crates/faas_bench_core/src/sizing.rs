//! Padding arithmetic for size-controlled deployment artifacts.
//!
//! Configuration expresses artifact sizes in mebibytes; the packager measures
//! archives in bytes. Padding is the difference between the two and can never
//! be negative: an artifact is only ever grown towards its target.

use tracing::info;

use crate::error::SizingError;

pub const BYTES_PER_MEBIBYTE: u64 = 1024 * 1024;

pub fn bytes_to_mebibytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEBIBYTE as f64
}

/// Negative and non-finite sizes collapse to zero, the natural-size sentinel.
pub fn mebibytes_to_bytes(mebibytes: f64) -> u64 {
    if !mebibytes.is_finite() || mebibytes <= 0.0 {
        return 0;
    }
    (mebibytes * BYTES_PER_MEBIBYTE as f64).round() as u64
}

/// Number of filler bytes needed for an artifact of `current_bytes` to reach
/// `target_bytes`.
///
/// A target of `0` means "use the natural size" and yields no padding.
pub fn filler_size_bytes(current_bytes: u64, target_bytes: u64) -> Result<u64, SizingError> {
    let target_bytes = if target_bytes == 0 {
        info!(
            natural_size_mb = bytes_to_mebibytes(current_bytes),
            "Desired image size is set to default (0MB), assigning size of zipped binary"
        );
        current_bytes
    } else {
        target_bytes
    };

    if target_bytes < current_bytes {
        return Err(SizingError::TargetBelowCurrent {
            current_bytes,
            target_bytes,
            current_mb: bytes_to_mebibytes(current_bytes),
            target_mb: bytes_to_mebibytes(target_bytes),
        });
    }

    Ok(target_bytes - current_bytes)
}
