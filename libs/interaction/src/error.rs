//! Interaction Error Types
//!
//! Expected protocol outcomes (incorrect state, unknown destination, bad
//! encoding, application errors) are explicit variants so callers have to
//! handle them; every variant maps onto a wire-level [`MalStandardError`].

use mal_types::{standard_errors, MalStandardError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalError {
    /// Stage received out of the pattern's legal order, or for a mismatched interaction
    #[error("Incorrect state: {message} (transaction: {transaction_id:?}, stage: {stage:?})")]
    IncorrectState {
        message: String,
        transaction_id: Option<u64>,
        stage: Option<u8>,
    },

    /// No provider or broker is bound to the URI
    #[error("Destination unknown: {uri}")]
    DestinationUnknown { uri: String },

    /// Body shape does not match what the stage requires
    #[error("Bad encoding: expected {expected} body, got {actual}")]
    BadEncoding {
        expected: &'static str,
        actual: &'static str,
    },

    /// Error raised by a provider or received from the remote side, carried verbatim
    #[error("{0}")]
    Standard(#[from] MalStandardError),

    /// Synchronous wait expired
    #[error("Timeout: transaction {transaction_id} received no reply within {timeout_ms}ms")]
    Timeout { transaction_id: u64, timeout_ms: u64 },

    /// Endpoint failed to deliver a message
    #[error("Transport error: {0}")]
    Transport(String),

    /// Access control rejected the message
    #[error("Security check failed: {0}")]
    Security(String),

    /// Operation not provided by the handler
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for interaction operations
pub type Result<T> = std::result::Result<T, MalError>;

impl MalError {
    pub fn incorrect_state(
        message: impl Into<String>,
        transaction_id: Option<u64>,
        stage: Option<u8>,
    ) -> Self {
        Self::IncorrectState {
            message: message.into(),
            transaction_id,
            stage,
        }
    }

    pub fn destination_unknown(uri: impl Into<String>) -> Self {
        Self::DestinationUnknown { uri: uri.into() }
    }

    pub fn bad_encoding(expected: &'static str, actual: &'static str) -> Self {
        Self::BadEncoding { expected, actual }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, MalError::IncorrectState { .. })
    }

    /// Wire representation used when this error is returned in an error reply
    pub fn to_standard_error(&self) -> MalStandardError {
        match self {
            MalError::IncorrectState { message, .. } => {
                MalStandardError::with_info(standard_errors::INCORRECT_STATE, message.clone())
            }
            MalError::DestinationUnknown { uri } => {
                MalStandardError::with_info(standard_errors::DESTINATION_UNKNOWN, uri.clone())
            }
            MalError::BadEncoding { .. } => {
                MalStandardError::with_info(standard_errors::BAD_ENCODING, self.to_string())
            }
            MalError::Standard(err) => err.clone(),
            MalError::Timeout { .. } => {
                MalStandardError::with_info(standard_errors::DELIVERY_TIMEDOUT, self.to_string())
            }
            MalError::Transport(message) => {
                MalStandardError::with_info(standard_errors::DELIVERY_FAILED, message.clone())
            }
            MalError::Security(message) => {
                MalStandardError::with_info(standard_errors::AUTHORISATION_FAIL, message.clone())
            }
            MalError::Unsupported(message) => {
                MalStandardError::with_info(standard_errors::UNSUPPORTED_OPERATION, message.clone())
            }
            MalError::Internal(message) => {
                MalStandardError::with_info(standard_errors::INTERNAL, message.clone())
            }
        }
    }
}
