//! Mapping of transport and configuration errors onto scanner statuses

use scand_core::ScanError;

use crate::config::ConfigError;
use crate::transport::TransportError;

impl From<TransportError> for ScanError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Busy(msg) => ScanError::DeviceBusy(msg),
            TransportError::NotFound(msg) => ScanError::Invalid(format!("no such device: {}", msg)),
            TransportError::AccessDenied(msg) => ScanError::AccessDenied(msg),
            TransportError::Unsupported(msg) => ScanError::Unsupported(msg),
            other => ScanError::Io(other.to_string()),
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        ScanError::Invalid(err.to_string())
    }
}
