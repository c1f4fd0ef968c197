//! Device and backend identification

use std::fmt;

use serde::{Deserialize, Serialize};

/// A device the backend can open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Name passed to `open`
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device kind, e.g. "sheetfed scanner"
    pub kind: String,
}

/// Backend version code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl Version {
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Packed version code (major << 24 | minor << 16 | build)
    pub fn code(&self) -> u32 {
        ((self.major as u32) << 24) | ((self.minor as u32) << 16) | self.build as u32
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}
