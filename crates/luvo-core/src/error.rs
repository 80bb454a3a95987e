//! Error types for lamp sessions

use luvo_protocol::{ProtocolError, TransportError};
use thiserror::Error;

/// Invalid input, rejected before anything is sent to the lamp
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallerError {
    /// Absolute brightness outside 0-100
    #[error("Brightness {0} outside 0-100")]
    BrightnessOutOfRange(u8),

    /// Relative brightness does not fit a signed byte
    #[error("Brightness delta {0} outside -128..=127")]
    DeltaOutOfRange(i16),

    /// No cached scene carries the requested name
    #[error("Unknown scene: {0}")]
    UnknownScene(String),
}

/// Errors returned by [`crate::LampSession`] operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LampError {
    /// Caller mistake, nothing was sent
    #[error("Invalid request: {0}")]
    Caller(#[from] CallerError),

    /// The lamp did not answer, answered garbage, or refused
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// The BLE connection failed or is gone
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<ProtocolError> for LampError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Transport(e) => LampError::Transport(e),
            other => LampError::Protocol(other),
        }
    }
}

impl LampError {
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, LampError::Caller(_))
    }

    /// Whether repeating the same request might succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LampError::Protocol(ProtocolError::Timeout) | LampError::Transport(_)
        )
    }
}
