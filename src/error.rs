//! Error types shared across the crate.
//!
//! Policy rejections (open circuit, exhausted quota) are never errors; they are
//! returned as regular values. The types here cover configuration problems,
//! counter store failures and webhook transport failures.

use thiserror::Error;

/// Invalid configuration detected at construction or load time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A numeric setting that must be at least 1 was zero.
    #[error("{field} must be greater than 0")]
    Zero {
        /// Name of the offending setting
        field: &'static str,
    },

    /// The webhook URL is empty or cannot be parsed.
    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {message}")]
    Parse {
        /// Parser error message
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn zero(field: &'static str) -> Self {
        Self::Zero { field }
    }
}

/// Failure talking to the shared counter store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped.
    #[error("counter store unavailable: {message}")]
    Unavailable {
        /// Underlying error message
        message: String,
    },

    /// The store answered with a value of the wrong shape.
    #[error("unexpected value stored at {key}: {message}")]
    InvalidValue {
        /// Key holding the unexpected value
        key: String,
        /// Description of the mismatch
        message: String,
    },
}

impl StoreError {
    /// Shorthand for an [`StoreError::Unavailable`] error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::unavailable(err.to_string())
    }
}

/// Failure of a single HTTP attempt at the transport level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Connection refused, DNS failure, reset, etc.
    #[error("network error: {message}")]
    Network {
        /// Underlying error message
        message: String,
    },
}

/// Why a webhook delivery did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The endpoint did not answer in time.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Network-level failure before a response was received.
    #[error("network error: {message}")]
    Network {
        /// Underlying error message
        message: String,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned HTTP {status}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
    },

    /// The payload could not be encoded as JSON.
    #[error("failed to serialize payload: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },
}

impl DeliveryError {
    /// Returns true for 4xx responses, which indicate a permanent client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::HttpStatus { status } if (400..500).contains(status))
    }

    /// Returns true if another attempt could plausibly succeed.
    ///
    /// 4xx responses and encoding failures repeat on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { .. } => !self.is_client_error(),
            Self::Serialization { .. } => false,
        }
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            TransportError::Network { message } => Self::Network { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(DeliveryError::HttpStatus { status: 404 }.is_client_error());
        assert!(DeliveryError::HttpStatus { status: 429 }.is_client_error());
        assert!(!DeliveryError::HttpStatus { status: 500 }.is_client_error());
        assert!(!DeliveryError::Timeout { timeout_ms: 10 }.is_client_error());
    }

    #[test]
    fn test_transient_classification() {
        assert!(DeliveryError::HttpStatus { status: 503 }.is_transient());
        assert!(!DeliveryError::HttpStatus { status: 422 }.is_transient());
        assert!(DeliveryError::Timeout { timeout_ms: 10 }.is_transient());
        assert!(DeliveryError::Network {
            message: "reset".into()
        }
        .is_transient());
        assert!(!DeliveryError::Serialization {
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: DeliveryError = TransportError::Timeout { timeout_ms: 5000 }.into();
        assert_eq!(err, DeliveryError::Timeout { timeout_ms: 5000 });
        assert_eq!(err.to_string(), "request timed out after 5000ms");
    }

    #[test]
    fn test_config_error_message() {
        assert_eq!(
            ConfigError::zero("points").to_string(),
            "points must be greater than 0"
        );
    }
}
