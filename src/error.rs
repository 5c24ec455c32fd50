//! Error types shared by the transport and the dispatch core.

use thiserror::Error;

/// Bot API status returned when the bot was blocked, kicked or removed
pub const CODE_FORBIDDEN: i32 = 403;
/// Bot API status for malformed or rejected requests
pub const CODE_BAD_REQUEST: i32 = 400;

/// Failure talking to the chat platform
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, timeout or decoding failure; worth retrying
    #[error("network error: {0}")]
    Network(String),

    /// The platform answered with a non-OK response
    #[error("api error {code}: {message}")]
    Api {
        /// Numeric status code
        code: i32,
        /// Platform description
        message: String,
    },

    /// The request was abandoned because its context was cancelled
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Convenience constructor for API errors
    #[must_use]
    pub fn api(code: i32, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Cancellation is an expected termination, not a failure
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The bot can no longer post into the chat
    #[must_use]
    pub const fn is_chat_unreachable(&self) -> bool {
        matches!(self, Self::Api { code, .. } if *code == CODE_FORBIDDEN)
    }

    /// Edit rejected because nothing changed
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { message, .. } if message.contains("not modified"))
    }

    /// Transient failures that a retry may fix
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Startup configuration failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sources could not be read or deserialized
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    /// A value was present but unusable
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_errors() {
        let kicked = TransportError::api(CODE_FORBIDDEN, "Forbidden: bot was kicked");
        assert!(kicked.is_chat_unreachable());
        assert!(!kicked.is_transient());

        let same = TransportError::api(CODE_BAD_REQUEST, "Bad Request: message is not modified");
        assert!(same.is_not_modified());
        assert!(!same.is_chat_unreachable());
    }

    #[test]
    fn cancellation_is_not_transient() {
        assert!(TransportError::Cancelled.is_cancelled());
        assert!(!TransportError::Cancelled.is_transient());
        assert!(TransportError::Network("reset".into()).is_transient());
    }
}
