//! Error types for the player/pipeline layer.
//!
//! Only caller mistakes surface as `Err` values: invoking a
//! capability-gated operation the active player does not support, publishing
//! on an unadvertised topic, or using a closed player. Data conditions such
//! as schema failures, protocol violations, and dropped connections never
//! throw; they are recorded as [`Problem`](crate::problems::Problem)s on the
//! emitted state instead.

use std::time::Duration;
use thiserror::Error;

use crate::types::Capability;

/// Result type alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for player and pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("operation requires the {capability:?} capability, which the active player does not declare")]
    UnsupportedCapability { capability: Capability },

    #[error("cannot publish on topic '{topic}': it has not been advertised")]
    UnknownPublication { topic: String },

    #[error("cannot publish on topic '{topic}': no supported encoding ({encoding})")]
    UnsupportedEncoding { topic: String, encoding: String },

    #[error("player is not connected")]
    NotConnected,

    #[error("player has been closed")]
    Closed,

    #[error("failed to connect: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("configuration error: {details}")]
    Config { details: String },
}

impl PipelineError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Connection { .. } => true,
            PipelineError::Timeout { .. } => true,
            PipelineError::NotConnected => true,
            PipelineError::UnsupportedCapability { .. } => false,
            PipelineError::UnknownPublication { .. } => false,
            PipelineError::UnsupportedEncoding { .. } => false,
            PipelineError::Closed => false,
            PipelineError::Config { .. } => false,
        }
    }

    /// Helper constructor for capability violations.
    pub fn unsupported(capability: Capability) -> Self {
        PipelineError::UnsupportedCapability { capability }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        PipelineError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with a source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PipelineError::Connection { reason: reason.into(), source: Some(source) }
    }
}
