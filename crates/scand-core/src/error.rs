//! Status taxonomy and error types shared by all scanner backends

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for backend operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Status codes of the scanner access protocol
///
/// The numeric values follow the common scanner API so frontends that log
/// raw status numbers stay comparable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ScanStatus {
    Good = 0,
    Unsupported = 1,
    Cancelled = 2,
    DeviceBusy = 3,
    Invalid = 4,
    Eof = 5,
    Jammed = 6,
    NoDocs = 7,
    CoverOpen = 8,
    IoError = 9,
    NoMem = 10,
    AccessDenied = 11,
}

impl ScanStatus {
    /// Human-readable description, as printed by frontends
    pub fn description(&self) -> &'static str {
        match self {
            ScanStatus::Good => "Success",
            ScanStatus::Unsupported => "Operation not supported",
            ScanStatus::Cancelled => "Operation was cancelled",
            ScanStatus::DeviceBusy => "Device busy",
            ScanStatus::Invalid => "Invalid argument",
            ScanStatus::Eof => "End of file reached",
            ScanStatus::Jammed => "Document feeder jammed",
            ScanStatus::NoDocs => "Document feeder out of documents",
            ScanStatus::CoverOpen => "Scanner cover is open",
            ScanStatus::IoError => "Error during device I/O",
            ScanStatus::NoMem => "Out of memory",
            ScanStatus::AccessDenied => "Access to resource has been denied",
        }
    }

    /// Whether a caller may reasonably retry the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanStatus::DeviceBusy)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors that can occur in scanner backends
#[derive(Debug, Error)]
pub enum ScanError {
    /// Transport failure or protocol desync (length mismatch, timeout, EOF mid-transfer)
    #[error("I/O error: {0}")]
    Io(String),

    /// Transient hardware state (warm-up incomplete, option change mid-scan)
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// No media present where required
    #[error("No documents: {0}")]
    NoDocs(String),

    /// Normal end of the current data stream
    #[error("End of data")]
    Eof,

    /// Operation aborted cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Caller or protocol usage error (bad index, bad value, wrong state)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Buffer or registry allocation failure
    #[error("Out of memory: {0}")]
    NoMem(String),

    /// Feature intentionally not implemented
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Paper jam reported by the device
    #[error("Document feeder jammed")]
    Jammed,

    /// Cover open reported by the device
    #[error("Scanner cover is open")]
    CoverOpen,

    /// Permission to the device was refused
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

impl ScanError {
    /// Status code for this error
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanError::Io(_) => ScanStatus::IoError,
            ScanError::DeviceBusy(_) => ScanStatus::DeviceBusy,
            ScanError::NoDocs(_) => ScanStatus::NoDocs,
            ScanError::Eof => ScanStatus::Eof,
            ScanError::Cancelled => ScanStatus::Cancelled,
            ScanError::Invalid(_) => ScanStatus::Invalid,
            ScanError::NoMem(_) => ScanStatus::NoMem,
            ScanError::Unsupported(_) => ScanStatus::Unsupported,
            ScanError::Jammed => ScanStatus::Jammed,
            ScanError::CoverOpen => ScanStatus::CoverOpen,
            ScanError::AccessDenied(_) => ScanStatus::AccessDenied,
        }
    }

    /// Shorthand for an `Invalid` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        ScanError::Invalid(msg.into())
    }

    /// Shorthand for an `Io` error
    pub fn io(msg: impl Into<String>) -> Self {
        ScanError::Io(msg.into())
    }

    /// Whether this is the normal end-of-data condition
    pub fn is_eof(&self) -> bool {
        matches!(self, ScanError::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_numbering() {
        assert_eq!(ScanStatus::Good as u8, 0);
        assert_eq!(ScanStatus::Eof as u8, 5);
        assert_eq!(ScanStatus::IoError as u8, 9);
        assert_eq!(ScanStatus::AccessDenied as u8, 11);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ScanError::io("short write").status(), ScanStatus::IoError);
        assert_eq!(ScanError::Eof.status(), ScanStatus::Eof);
        assert_eq!(
            ScanError::DeviceBusy("lamp cold".into()).status(),
            ScanStatus::DeviceBusy
        );
        assert!(ScanError::DeviceBusy("x".into()).status().is_transient());
        assert!(!ScanError::Cancelled.status().is_transient());
    }
}
