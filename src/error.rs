//! # Error Types
//!
//! Error handling for the miIO protocol client.
//!
//! This module defines every error variant a caller can observe, from
//! transport failures to protocol-level rejections reported by the device.
//!
//! ## Error Categories
//! - **Protocol Errors**: timeouts, unknown methods, empty or invalid replies
//! - **Session Errors**: device not found, address or token unknown
//! - **Codec Errors**: malformed frames, checksum mismatches, cipher failures
//! - **Caller Errors**: invalid parameters, bad configuration
//!
//! Codec errors are internal: the session converts them into
//! [`MiioError::InvalidResponse`] before they reach the caller.
//!
//! ## Example Usage
//! ```rust
//! use miio_protocol::error::{MiioError, Result};
//! use tracing::{error, info};
//!
//! fn check_method(result: Result<String>) {
//!     match result {
//!         Ok(value) => info!(%value, "Device replied"),
//!         Err(MiioError::UnknownMethod) => info!("Method not supported by device"),
//!         Err(e) => error!(error = %e, "Command failed"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame validation errors
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame shorter than 32-byte header";
    pub const ERR_BAD_MAGIC: &str = "Frame magic is not 0x2131";
    pub const ERR_LENGTH_MISMATCH: &str = "Declared frame length does not match datagram length";
    pub const ERR_FRAME_TOO_LARGE: &str = "Frame exceeds maximum datagram size";
    pub const ERR_MISSING_TOKEN: &str = "Payload present but no token available to decrypt it";

    /// Payload errors
    pub const ERR_MISSING_ID: &str = "Reply has no numeric id";
    pub const ERR_ID_MISMATCH: &str = "Reply id does not match request id";
    pub const ERR_UNKNOWN_DEVICE: &str = "Reply carries unknown device id or timestamp";
    pub const ERR_RESULT_SHAPE: &str = "Unexpected result shape";
    pub const ERR_NOT_AN_OBJECT: &str = "Payload is not a JSON object";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";

    /// Parameter errors
    pub const ERR_PARAMS_SHAPE: &str = "Parameters must be a JSON array or object";
    pub const ERR_INVALID_HEX: &str = "Invalid hex string";
}

/// MiioError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum MiioError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No valid reply within the retry budget
    #[error("Timeout occurred")]
    Timeout,

    /// The device explicitly reported that it does not implement the method
    #[error("Unknown method")]
    UnknownMethod,

    /// Discovery did not find a (matching) device
    #[error("Device not found")]
    DeviceNotFound,

    /// A structurally valid reply that carried no result
    #[error("Empty response")]
    EmptyResponse,

    /// Bad checksum, id mismatch, malformed JSON or unexpected result shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IP address or token unknown")]
    IpOrTokenUnknown,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The device replied with an `error` object instead of a result
    #[error("Device error {code}: {message}")]
    DeviceError { code: i64, message: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MiioError {
    /// Whether this error came from decoding or validating a received frame.
    ///
    /// These are the errors the session folds into `InvalidResponse`.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            MiioError::InvalidFrame(_)
                | MiioError::ChecksumMismatch
                | MiioError::Crypto(_)
                | MiioError::Json(_)
                | MiioError::InvalidResponse(_)
        )
    }

    /// Convert a codec-level failure into the caller-facing `InvalidResponse`.
    pub fn into_response_error(self) -> MiioError {
        if self.is_decode_failure() {
            match self {
                MiioError::InvalidResponse(_) => self,
                other => MiioError::InvalidResponse(other.to_string()),
            }
        } else {
            self
        }
    }
}

impl From<serde_json::Error> for MiioError {
    fn from(e: serde_json::Error) -> Self {
        MiioError::Json(e.to_string())
    }
}

/// Type alias for Results using MiioError
pub type Result<T> = std::result::Result<T, MiioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_failures_fold_into_invalid_response() {
        let err = MiioError::ChecksumMismatch.into_response_error();
        assert!(matches!(err, MiioError::InvalidResponse(ref m) if m == "Checksum mismatch"));

        let err = MiioError::InvalidResponse("id".into()).into_response_error();
        assert!(matches!(err, MiioError::InvalidResponse(ref m) if m == "id"));
    }

    #[test]
    fn test_protocol_errors_pass_through() {
        assert!(matches!(
            MiioError::Timeout.into_response_error(),
            MiioError::Timeout
        ));
        assert!(matches!(
            MiioError::UnknownMethod.into_response_error(),
            MiioError::UnknownMethod
        ));
    }
}
