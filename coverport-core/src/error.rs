//! Error types for coverport core.

use std::io;

use thiserror::Error;

/// Error type for coverage collection and processing.
#[derive(Debug, Error)]
pub enum CoverportError {
    /// Contradictory or missing discovery parameters.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Target enumeration against the cluster failed.
    #[error("resolution error: {0}")]
    Resolution(String),
    /// The tunnel to a target could not be established.
    #[error("tunnel setup failed: {0}")]
    TunnelSetup(String),
    /// The coverage endpoint never answered the liveness probe.
    #[error("coverage endpoint unreachable: {0}")]
    Unreachable(String),
    /// A coverage protocol request failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Coverage data or tool output could not be decoded or parsed.
    #[error("malformed payload: {0}")]
    Payload(String),
    /// An external tool is missing or exited unsuccessfully.
    #[error("tool error: {0}")]
    Tool(String),
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverportError {
    /// Whether the failure only skips the target rather than failing it.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Convenience result type for coverport core.
pub type Result<T> = std::result::Result<T, CoverportError>;
