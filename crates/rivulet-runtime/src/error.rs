//! Error taxonomy for flows

use crate::config::ConfigError;
use rivulet_core::EvalError;
use thiserror::Error;

/// Errors raised while building or running a flow.
///
/// Only [`FlowError::GraphProtocol`] and [`FlowError::Join`] are fatal to a
/// running flow. The other variants are recovered close to where they occur.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Emit on a terminal context, or a malformed graph.
    #[error("graph protocol violation: {0}")]
    GraphProtocol(String),

    /// A record could not be encoded for an external sink.
    #[error("cannot encode field '{field}': {reason}")]
    Encoding { field: String, reason: String },

    /// An external stream name is already bound at top level.
    #[error("stream '{0}' already exists")]
    BindingConflict(String),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// Cooperative shutdown.
    #[error("flow cancelled")]
    Cancelled,

    #[error("cannot parse field '{field}': {reason}")]
    Parse { field: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker task panicked or was aborted.
    #[error("worker '{0}' failed to join: {1}")]
    Join(String, String),
}

impl FlowError {
    /// True if this error should tear the whole flow down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::GraphProtocol(_) | FlowError::Join(..))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled)
    }
}

pub type Result<T, E = FlowError> = std::result::Result<T, E>;
