//! Error types for WeChat Pay trust operations.
//!
//! Cryptographic and structural failures are always surfaced as typed errors;
//! nothing in this crate downgrades a failed verification or decryption into a
//! degraded success.

use std::fmt;

/// Stable error codes for FFI and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WxPayErrorCode {
    /// Invalid client configuration
    InvalidConfig = 1000,
    /// Merchant key, certificate or APIv3 key is unusable
    InvalidCredentials = 1001,
    /// Transport/network layer error
    Transport = 2000,
    /// Connection failed
    ConnectionFailed = 2001,
    /// Request timed out
    Timeout = 2002,
    /// Remote service answered with a non-2xx status
    Api = 2100,
    /// Serial number not present in the trust store
    UntrustedCertificate = 3000,
    /// Trust store holds no certificates
    NoTrustedCertificates = 3001,
    /// Signature mismatch on a response or webhook
    VerificationFailed = 3002,
    /// AEAD tag mismatch
    AuthenticationFailure = 3003,
    /// Structurally invalid payload
    MalformedPayload = 4000,
    /// Asymmetric encryption input exceeds key capacity
    PayloadTooLarge = 4001,
    /// Serialization error
    Serialization = 4002,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Error type for all `wxpay-lib` operations.
#[derive(Debug)]
pub enum WxPayError {
    /// A configuration value is invalid.
    InvalidConfig {
        /// Configuration field
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Merchant credentials could not be loaded or do not match.
    InvalidCredentials(String),

    /// Transport/network layer error.
    Transport(String),

    /// Connection failed.
    ConnectionFailed {
        /// Target endpoint or service
        target: String,
        /// Underlying error message
        reason: String,
    },

    /// Request timed out.
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The remote service rejected the call.
    Api {
        /// HTTP status code
        status: u16,
        /// Protocol error code (e.g. `PARAM_ERROR`)
        code: String,
        /// Human readable message from the remote service
        message: String,
    },

    /// The claimed serial number is not in the trust store.
    ///
    /// Usually means the store is stale or the serial was spoofed.
    UntrustedCertificate {
        /// Serial number presented by the remote side
        serial_no: String,
    },

    /// The trust store is empty.
    NoTrustedCertificates,

    /// Signature verification failed.
    VerificationFailed(String),

    /// AEAD tag verification failed (tampered payload or wrong key).
    AuthenticationFailure(String),

    /// Payload is structurally invalid.
    MalformedPayload(String),

    /// Plaintext is too long for the RSA key.
    PayloadTooLarge {
        /// Plaintext length in bytes
        len: usize,
        /// Maximum accepted length in bytes
        max: usize,
    },

    /// Serialization/deserialization error.
    Serialization(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl WxPayError {
    /// Get the error code.
    pub fn code(&self) -> WxPayErrorCode {
        match self {
            Self::InvalidConfig { .. } => WxPayErrorCode::InvalidConfig,
            Self::InvalidCredentials(_) => WxPayErrorCode::InvalidCredentials,
            Self::Transport(_) => WxPayErrorCode::Transport,
            Self::ConnectionFailed { .. } => WxPayErrorCode::ConnectionFailed,
            Self::Timeout { .. } => WxPayErrorCode::Timeout,
            Self::Api { .. } => WxPayErrorCode::Api,
            Self::UntrustedCertificate { .. } => WxPayErrorCode::UntrustedCertificate,
            Self::NoTrustedCertificates => WxPayErrorCode::NoTrustedCertificates,
            Self::VerificationFailed(_) => WxPayErrorCode::VerificationFailed,
            Self::AuthenticationFailure(_) => WxPayErrorCode::AuthenticationFailure,
            Self::MalformedPayload(_) => WxPayErrorCode::MalformedPayload,
            Self::PayloadTooLarge { .. } => WxPayErrorCode::PayloadTooLarge,
            Self::Serialization(_) => WxPayErrorCode::Serialization,
            Self::Internal(_) => WxPayErrorCode::Internal,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Cryptographic and structural failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns a suggested retry delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { .. } => Some(1000),
            Self::ConnectionFailed { .. } => Some(2000),
            Self::Transport(_) => Some(1000),
            Self::Api { status: 429, .. } => Some(5000),
            Self::Api { status, .. } if *status >= 500 => Some(2000),
            _ => None,
        }
    }

    /// Returns true for failures that must cause an inbound message to be rejected.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            Self::UntrustedCertificate { .. }
                | Self::NoTrustedCertificates
                | Self::VerificationFailed(_)
                | Self::AuthenticationFailure(_)
                | Self::MalformedPayload(_)
        )
    }

    /// Create an untrusted certificate error.
    pub fn untrusted(serial_no: impl Into<String>) -> Self {
        Self::UntrustedCertificate {
            serial_no: serial_no.into(),
        }
    }

    /// Create a malformed payload error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }

    /// Create an invalid config error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for WxPayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { field, reason } => {
                write!(f, "invalid config {}: {}", field, reason)
            }
            Self::InvalidCredentials(msg) => write!(f, "invalid merchant credentials: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::ConnectionFailed { target, reason } => {
                write!(f, "connection to {} failed: {}", target, reason)
            }
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "{} timed out after {}ms", operation, timeout_ms),
            Self::Api {
                status,
                code,
                message,
            } => write!(f, "api error {} ({}): {}", status, code, message),
            Self::UntrustedCertificate { serial_no } => {
                write!(f, "no trusted platform certificate with serial {}", serial_no)
            }
            Self::NoTrustedCertificates => write!(f, "platform certificate store is empty"),
            Self::VerificationFailed(msg) => write!(f, "signature verification failed: {}", msg),
            Self::AuthenticationFailure(msg) => write!(f, "authenticated decryption failed: {}", msg),
            Self::MalformedPayload(msg) => write!(f, "malformed payload: {}", msg),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds RSA-OAEP limit of {} bytes", len, max)
            }
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for WxPayError {}

impl From<serde_json::Error> for WxPayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = WxPayError::Timeout {
            operation: "GET /v3/certificates".to_string(),
            timeout_ms: 300_000,
        };
        assert_eq!(err.code(), WxPayErrorCode::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(1000));
    }

    #[test]
    fn test_trust_failures_are_not_retryable() {
        let errors = [
            WxPayError::untrusted("5157F09E"),
            WxPayError::VerificationFailed("mismatch".into()),
            WxPayError::AuthenticationFailure("tag".into()),
            WxPayError::malformed("missing resource"),
        ];
        for err in errors {
            assert!(err.is_trust_failure(), "{err}");
            assert!(!err.is_retryable(), "{err}");
            assert_eq!(err.retry_after_ms(), None);
        }
    }

    #[test]
    fn test_api_error_retryability() {
        let throttled = WxPayError::Api {
            status: 429,
            code: "FREQUENCY_LIMITED".into(),
            message: "slow down".into(),
        };
        assert!(throttled.is_retryable());
        assert_eq!(throttled.retry_after_ms(), Some(5000));

        let rejected = WxPayError::Api {
            status: 400,
            code: "PARAM_ERROR".into(),
            message: "bad".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(rejected.to_string().contains("PARAM_ERROR"));
    }

    #[test]
    fn test_error_display() {
        let err = WxPayError::PayloadTooLarge { len: 300, max: 214 };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("214"));

        let err = WxPayError::untrusted("ABC");
        assert_eq!(err.code(), WxPayErrorCode::UntrustedCertificate);
        assert!(err.to_string().contains("ABC"));
    }
}
