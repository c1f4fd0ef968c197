//! Command/response transactions over a bulk connection
//!
//! One transaction is: command block out, optional payload out, optional
//! reply in. Each phase runs under its own timeout and every transferred
//! length is checked against what was asked for. Nothing here retries.

use std::time::Duration;

use bytes::Bytes;
use scand_core::{ScanError, ScanResult};
use tracing::{debug, trace, warn};

use crate::config::TimeoutConfig;
use crate::transport::{DeviceConnection, Transport, UsbIds};

/// Timeout scale for one transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutMode {
    #[default]
    Normal,
    /// Polling mode: every phase timeout divided by the short divisor
    Short,
}

/// Per-phase timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    pub command: Duration,
    pub data: Duration,
    pub short_divisor: u32,
}

impl TimeoutProfile {
    pub fn command_timeout(&self, mode: TimeoutMode) -> Duration {
        self.scaled(self.command, mode)
    }

    pub fn data_timeout(&self, mode: TimeoutMode) -> Duration {
        self.scaled(self.data, mode)
    }

    fn scaled(&self, base: Duration, mode: TimeoutMode) -> Duration {
        match mode {
            TimeoutMode::Normal => base,
            TimeoutMode::Short => base / self.short_divisor.max(1),
        }
    }
}

impl Default for TimeoutProfile {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for TimeoutProfile {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            command: Duration::from_millis(config.command_ms),
            data: Duration::from_millis(config.data_ms),
            short_divisor: config.short_divisor,
        }
    }
}

/// One command with its optional payload and expected reply size
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub command: &'a [u8],
    pub payload: Option<&'a [u8]>,
    pub reply_len: Option<usize>,
    pub mode: TimeoutMode,
}

impl<'a> Request<'a> {
    pub fn new(command: &'a [u8]) -> Self {
        Self {
            command,
            payload: None,
            reply_len: None,
            mode: TimeoutMode::Normal,
        }
    }

    pub fn with_payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_reply(mut self, len: usize) -> Self {
        self.reply_len = Some(len);
        self
    }

    pub fn short(mut self) -> Self {
        self.mode = TimeoutMode::Short;
        self
    }
}

/// Completion status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Good,
    /// The reply was shorter than requested
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: ReplyStatus,
    /// Bytes actually received
    pub data: Bytes,
}

impl Reply {
    pub fn is_complete(&self) -> bool {
        self.status == ReplyStatus::Good
    }
}

// =============================================================================
// Device Handle
// =============================================================================

/// Open connection to one named device
pub struct DeviceHandle {
    name: String,
    ids: UsbIds,
    connection: Option<Box<dyn DeviceConnection>>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("ids", &self.ids)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl DeviceHandle {
    pub async fn open(transport: &dyn Transport, name: &str) -> ScanResult<Self> {
        let connection = transport.open(name).await?;
        debug!(device = name, ids = %connection.usb_ids(), "Device opened");
        Ok(Self::from_connection(name, connection))
    }

    pub fn from_connection(name: &str, connection: Box<dyn DeviceConnection>) -> Self {
        Self {
            name: name.to_string(),
            ids: connection.usb_ids(),
            connection: Some(connection),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usb_ids(&self) -> UsbIds {
        self.ids
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&mut self) -> ScanResult<&mut Box<dyn DeviceConnection>> {
        let name = &self.name;
        self.connection
            .as_mut()
            .ok_or_else(|| ScanError::invalid(format!("device '{}' is not open", name)))
    }

    /// Release the connection; closing a closed handle is a no-op
    pub async fn close(&mut self) -> ScanResult<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        debug!(device = %self.name, "Closing device");
        connection.close().await.map_err(ScanError::from)
    }
}

// =============================================================================
// Command Transaction
// =============================================================================

/// Transaction engine bound to one device handle
#[derive(Debug)]
pub struct CommandTransaction {
    handle: DeviceHandle,
    timeouts: TimeoutProfile,
}

impl CommandTransaction {
    pub fn new(handle: DeviceHandle, timeouts: TimeoutProfile) -> Self {
        Self { handle, timeouts }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn timeouts(&self) -> TimeoutProfile {
        self.timeouts
    }

    pub async fn close(&mut self) -> ScanResult<()> {
        self.handle.close().await
    }

    /// Run one command/response exchange
    pub async fn execute(&mut self, request: Request<'_>) -> ScanResult<Reply> {
        let command_timeout = self.timeouts.command_timeout(request.mode);
        let data_timeout = self.timeouts.data_timeout(request.mode);
        let connection = self.handle.connection()?;

        trace!(
            len = request.command.len(),
            timeout_ms = command_timeout.as_millis() as u64,
            "cmd >> {}",
            hex::encode(request.command)
        );
        write_phase(connection.as_mut(), "cmd", request.command, command_timeout).await?;

        if let Some(payload) = request.payload.filter(|p| !p.is_empty()) {
            trace!(
                len = payload.len(),
                timeout_ms = data_timeout.as_millis() as u64,
                "out >> {}",
                hex::encode(payload)
            );
            write_phase(connection.as_mut(), "out", payload, data_timeout).await?;
        }

        let Some(capacity) = request.reply_len else {
            return Ok(Reply {
                status: ReplyStatus::Good,
                data: Bytes::new(),
            });
        };

        let data = connection
            .read_bulk(capacity, data_timeout)
            .await
            .map_err(|e| {
                debug!(phase = "in", error = %e, "Read failed");
                ScanError::from(e)
            })?;
        if data.len() > capacity {
            warn!(phase = "in", got = data.len(), capacity, "Device overran reply buffer");
            return Err(ScanError::io(format!(
                "in: received {} bytes into a {} byte buffer",
                data.len(),
                capacity
            )));
        }
        if !data.is_empty() {
            trace!(len = data.len(), "in << {}", hex::encode(&data));
        }

        let status = if data.len() < capacity {
            debug!(phase = "in", got = data.len(), wanted = capacity, "Short read");
            ReplyStatus::Eof
        } else {
            ReplyStatus::Good
        };
        Ok(Reply {
            status,
            data: Bytes::from(data),
        })
    }
}

async fn write_phase(
    connection: &mut dyn DeviceConnection,
    phase: &'static str,
    data: &[u8],
    timeout: Duration,
) -> ScanResult<()> {
    let written = connection.write_bulk(data, timeout).await.map_err(|e| {
        debug!(phase, error = %e, "Write failed");
        ScanError::from(e)
    })?;
    if written != data.len() {
        debug!(phase, written, wanted = data.len(), "Wrong write size");
        return Err(ScanError::io(format!(
            "{}: wrote {} of {} bytes",
            phase,
            written,
            data.len()
        )));
    }
    Ok(())
}
