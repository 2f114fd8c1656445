//! Engine error kinds
//!
//! No error crosses a thread boundary: the audio thread drops the affected
//! layer and logs, while game-thread entry points surface one of these.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Unknown object id or name
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Engine uninitialized or asset source not opened
    #[error("engine is not ready: {0}")]
    NotReady(String),

    /// No free layer and the requested priority is too low to evict
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Stream returned zero frames
    #[error("source ended")]
    SourceEnded,

    /// Missing pipeline, master bus, or other invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Output device could not be opened
    #[error("device open failed: {0}")]
    DeviceOpenFailed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
