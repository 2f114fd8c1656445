//! Spatial processing errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpatialError {
    /// HRIR asset data is malformed
    #[error("invalid HRIR asset: {0}")]
    InvalidHrirAsset(String),

    /// Unsupported ambisonic order
    #[error("unsupported ambisonic order: {0}")]
    InvalidAmbisonicOrder(usize),

    /// I/O failure while reading an asset
    #[error("asset read failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type SpatialResult<T> = Result<T, SpatialError>;
