//! Error types for stampede-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Coordinator configuration error (bad user total, etc.)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A scenario step references a rendezvous point that was never declared
    #[error("unknown rendezvous point: {0}")]
    UnknownBarrier(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
