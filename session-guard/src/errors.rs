use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GuardError {
    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Credential errors
    CryptoError(String),
    InvalidCredential(String),
    BiometricUnavailable(String),

    // Validation errors
    ValidationError(String),

    // Application errors
    NotInitialized,
    NotAuthenticated,
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GuardError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            GuardError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            GuardError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            GuardError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            GuardError::InvalidCredential(msg) => write!(f, "Invalid credential: {}", msg),
            GuardError::BiometricUnavailable(msg) => {
                write!(f, "Biometric authentication unavailable: {}", msg)
            }

            GuardError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            GuardError::NotInitialized => write!(f, "Session guard not initialized"),
            GuardError::NotAuthenticated => write!(f, "No authenticated session"),
            GuardError::NotFound(msg) => write!(f, "Not found: {}", msg),

            GuardError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for GuardError {}

pub type GuardResult<T> = Result<T, GuardError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! guard_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::GuardError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::GuardError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for GuardError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => GuardError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                GuardError::PermissionDenied(error.to_string())
            }
            _ => GuardError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        GuardError::ValidationError(format!("JSON error: {}", error))
    }
}
