use std::fmt;

use serde::Serialize;
use signet_pki::PkiError;
use thiserror::Error;

/// Machine-readable error codes
pub mod codes {
    pub const TOKEN_NOT_FOUND: &str = "token_not_found";
    pub const KEY_NOT_FOUND: &str = "key_not_found";
    pub const CERT_NOT_FOUND: &str = "cert_not_found";
    pub const CSR_NOT_FOUND: &str = "csr_not_found";
    pub const UNKNOWN_MEMBER: &str = "unknown_member";
    pub const TOKEN_NOT_ACTIVE: &str = "token_not_active";
    pub const TOKEN_NOT_INITIALIZED: &str = "token_not_initialized";
    pub const TOKEN_ALREADY_INITIALIZED: &str = "token_already_initialized";
    pub const PIN_INCORRECT: &str = "pin_incorrect";
    pub const KEY_NOT_AVAILABLE: &str = "key_not_available";
    pub const CERT_EXISTS: &str = "cert_exists";
    pub const WRONG_CERT_USAGE: &str = "wrong_cert_usage";
    pub const INCORRECT_CERTIFICATE: &str = "incorrect_certificate";
    pub const CERT_IMPORT_FAILED: &str = "cert_import_failed";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNSUPPORTED_OPERATION: &str = "unsupported_operation";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Coded error returned by every signer operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct SignerError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl SignerError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, code, message)
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn token_not_found(token_id: &str) -> Self {
        Self::not_found(codes::TOKEN_NOT_FOUND, format!("Token '{}' not found", token_id))
    }

    pub fn key_not_found(key_id: &str) -> Self {
        Self::not_found(codes::KEY_NOT_FOUND, format!("Key '{}' not found", key_id))
    }

    pub fn cert_not_found(cert_id: &str) -> Self {
        Self::not_found(codes::CERT_NOT_FOUND, format!("Certificate '{}' not found", cert_id))
    }

    pub fn csr_not_found(csr_id: &str) -> Self {
        Self::not_found(
            codes::CSR_NOT_FOUND,
            format!("Certificate request '{}' not found", csr_id),
        )
    }

    pub fn token_not_active(token_id: &str) -> Self {
        Self::conflict(codes::TOKEN_NOT_ACTIVE, format!("Token '{}' not active", token_id))
    }

    pub fn token_not_initialized(token_id: &str) -> Self {
        Self::conflict(
            codes::TOKEN_NOT_INITIALIZED,
            format!("Token '{}' not initialized", token_id),
        )
    }

    pub fn pin_incorrect() -> Self {
        Self::conflict(codes::PIN_INCORRECT, "PIN incorrect")
    }

    pub fn key_not_available(key_id: &str) -> Self {
        Self::conflict(codes::KEY_NOT_AVAILABLE, format!("Key '{}' not available", key_id))
    }

    pub fn wrong_usage(message: impl Into<String>) -> Self {
        Self::conflict(codes::WRONG_CERT_USAGE, message)
    }

    pub fn incorrect_certificate(message: impl Into<String>) -> Self {
        Self::validation(codes::INCORRECT_CERTIFICATE, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::validation(codes::INVALID_REQUEST, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::conflict(codes::UNSUPPORTED_OPERATION, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<signet_key::Error> for SignerError {
    fn from(err: signet_key::Error) -> Self {
        match err {
            signet_key::Error::PinIncorrect => SignerError::pin_incorrect(),
            other => SignerError::internal(other.to_string()),
        }
    }
}

impl From<PkiError> for SignerError {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::ParseError(msg) => SignerError::incorrect_certificate(msg),
            PkiError::KeyError(inner) => inner.into(),
            other => SignerError::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SignerError {
    fn from(err: std::io::Error) -> Self {
        SignerError::internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(err: serde_json::Error) -> Self {
        SignerError::internal(format!("JSON error: {}", err))
    }
}

pub type Result<T, E = SignerError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = SignerError::key_not_found("AB12");
        assert_eq!(err.to_string(), "key_not_found: Key 'AB12' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_provider_errors_translated() {
        let pin: SignerError = signet_key::Error::PinIncorrect.into();
        assert_eq!(pin.code, codes::PIN_INCORRECT);
        assert_eq!(pin.kind, ErrorKind::Conflict);

        let parse: SignerError = PkiError::ParseError("bad der".into()).into();
        assert_eq!(parse.kind, ErrorKind::Validation);
        assert_eq!(parse.code, codes::INCORRECT_CERTIFICATE);

        let chain: SignerError = PkiError::ChainError("no anchor".into()).into();
        assert_eq!(chain.kind, ErrorKind::Internal);
    }
}
