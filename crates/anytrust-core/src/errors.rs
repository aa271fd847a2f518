//! Unified error system for AnyTrust
//!
//! A single error type shared by the streaming protocol and the committee
//! aggregator. Variants follow the failure classes the system distinguishes:
//! configuration problems are fatal at construction, protocol violations end
//! one streaming session, transport errors surface to the caller unchanged,
//! quorum failures are aggregator-level, and verification failures discard a
//! single backend response.

use serde::{Deserialize, Serialize};

/// Unified error type for all AnyTrust operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AnytrustError {
    /// Invalid configuration (bad masks, zero quorum, unparseable keys)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration problem
        message: String,
    },

    /// A streaming protocol instance saw inconsistent or out-of-window input
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Error message describing the violation
        message: String,
    },

    /// Dial or RPC failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport failure
        message: String,
    },

    /// The remote side does not expose the requested RPC method
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// Name of the missing method
        method: String,
    },

    /// Fewer than K valid backend responses were collected
    #[error("Quorum failure: {message}")]
    QuorumFailure {
        /// Error message describing the shortfall
        message: String,
    },

    /// Signature or content-hash mismatch
    #[error("Verification failed: {message}")]
    Verification {
        /// Error message describing the failed check
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl AnytrustError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Create a quorum failure error
    pub fn quorum_failure(message: impl Into<String>) -> Self {
        Self::QuorumFailure {
            message: message.into(),
        }
    }

    /// Create a verification error
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error reports a missing remote method
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::MethodNotFound { .. })
    }

    /// True for errors that end a single streaming session
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Standard Result type for AnyTrust operations
pub type Result<T> = std::result::Result<T, AnytrustError>;

impl From<std::io::Error> for AnytrustError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AnytrustError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AnytrustError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for AnytrustError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        Self::crypto(err.to_string())
    }
}
