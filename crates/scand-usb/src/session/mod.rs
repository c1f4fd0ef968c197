//! Scan sessions on an open device
//!
//! This module holds the per-device state machine: option changes, lamp
//! warm-up, acquisition and the end-of-page power-down.

mod device;

pub use device::{ScanSession, SessionSettings};

use std::fmt;

/// Scan session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet bound to a device
    #[default]
    Idle,
    /// Device open, no scan running
    Opened,
    /// An option change is in progress
    Configuring,
    /// Scan started, nothing read yet
    Started,
    Reading,
    /// Scan being aborted
    Cancelling,
    /// Page delivered up to `Eof`
    Finished,
    Closed,
}

impl SessionState {
    /// A scan is running
    pub fn is_scanning(&self) -> bool {
        matches!(self, SessionState::Started | SessionState::Reading)
    }

    /// A scan may be started from here
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Opened | SessionState::Finished)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Opened => "opened",
            SessionState::Configuring => "configuring",
            SessionState::Started => "started",
            SessionState::Reading => "reading",
            SessionState::Cancelling => "cancelling",
            SessionState::Finished => "finished",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}
