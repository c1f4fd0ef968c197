//! Simulated CardScan devices for testing
//!
//! Each [`MockDevice`] answers the CardScan command set: calibration,
//! lamp warm-up, block requests and power-down. Image data is a synthetic
//! byte stream that restarts with every warm-up poll, so a page always begins
//! at scanline zero of whatever mode it was started in.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{DeviceConnection, Transport, TransportError, UsbIds};
use crate::config::{MockConfig, MockDeviceConfig};
use crate::profile::cardscan::{HEADER_SIZE, PIXELS_PER_LINE, POWER_DOWN_REPLY};

const LAMP_COLD: u8 = 0x80;
const LAMP_HOT: u8 = 0x10;

/// Mock transport serving a fixed set of simulated devices
pub struct MockTransport {
    latency: Duration,
    devices: Vec<Arc<MockDevice>>,
}

impl MockTransport {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            devices: config
                .devices
                .iter()
                .cloned()
                .map(|c| Arc::new(MockDevice::new(c)))
                .collect(),
        }
    }

    pub fn with_devices(devices: Vec<MockDeviceConfig>) -> Self {
        Self::new(&MockConfig {
            latency_ms: 0,
            devices,
        })
    }

    /// Simulated device by name, for inspection in tests
    pub fn device(&self, name: &str) -> Option<Arc<MockDevice>> {
        self.devices.iter().find(|d| d.config.name == name).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn enumerate(&self, ids: UsbIds) -> Result<Vec<String>, TransportError> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.ids() == ids && !d.is_unplugged())
            .map(|d| d.config.name.clone())
            .collect())
    }

    async fn open(&self, name: &str) -> Result<Box<dyn DeviceConnection>, TransportError> {
        let device = self
            .device(name)
            .filter(|d| !d.is_unplugged())
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        if device.open.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Busy(format!("{} is already claimed", name)));
        }
        device.state.lock().pending = None;
        Ok(Box::new(MockConnection {
            device,
            latency: self.latency,
            closed: false,
        }))
    }
}

// =============================================================================
// Simulated device
// =============================================================================

#[derive(Debug, Default)]
struct DeviceState {
    pending: Option<Vec<u8>>,
    /// Byte position within the current page's raw stream
    stream_pos: usize,
    /// Raw bytes per scanline of the current page
    stream_line_bytes: usize,
    not_ready_left: u32,
}

/// One simulated scanner
#[derive(Debug)]
pub struct MockDevice {
    config: MockDeviceConfig,
    state: Mutex<DeviceState>,
    open: AtomicBool,
    unplugged: AtomicBool,
    no_docs: AtomicBool,
    commands: AtomicUsize,
    warm_up_polls: AtomicUsize,
    block_requests: AtomicUsize,
    power_downs: AtomicUsize,
}

impl MockDevice {
    fn new(config: MockDeviceConfig) -> Self {
        let state = DeviceState {
            stream_line_bytes: PIXELS_PER_LINE,
            not_ready_left: config.not_ready_blocks,
            ..Default::default()
        };
        Self {
            no_docs: AtomicBool::new(config.no_docs),
            config,
            state: Mutex::new(state),
            open: AtomicBool::new(false),
            unplugged: AtomicBool::new(false),
            commands: AtomicUsize::new(0),
            warm_up_polls: AtomicUsize::new(0),
            block_requests: AtomicUsize::new(0),
            power_downs: AtomicUsize::new(0),
        }
    }

    pub fn ids(&self) -> UsbIds {
        UsbIds::new(self.config.vendor_id, self.config.product_id)
    }

    pub fn config(&self) -> &MockDeviceConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_unplugged(&self) -> bool {
        self.unplugged.load(Ordering::SeqCst)
    }

    /// Disconnect the device; open connections fail from now on
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    /// Take the document out of (or put it into) the feeder
    pub fn set_no_docs(&self, no_docs: bool) {
        self.no_docs.store(no_docs, Ordering::SeqCst);
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn warm_up_polls(&self) -> usize {
        self.warm_up_polls.load(Ordering::SeqCst)
    }

    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }

    pub fn power_downs(&self) -> usize {
        self.power_downs.load(Ordering::SeqCst)
    }

    /// Raw sensor value of pixel `x` on scanline `y` in `plane`
    ///
    /// Always within `[dark_level, light_level]`.
    pub fn raw_sample(&self, plane: usize, x: usize, y: usize) -> u8 {
        let dark = self.config.dark_level.min(self.config.light_level);
        let span = self.config.light_level.saturating_sub(dark) as usize;
        dark + ((x * 3 + y * 5 + plane * 64) % (span + 1)) as u8
    }

    fn header(&self) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_SIZE];
        header[1] = u8::from(!self.no_docs.load(Ordering::SeqCst));
        header
    }

    fn handle_command(&self, cmd: &[u8]) {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let reply = match cmd {
            [0x45, 0x00, 0x00] => Some(self.calibration_reply()),
            [0x12, 0x06, 0x00, 0x00, ..] => Some(self.warm_up_reply(1)),
            [0x18, 0x07, 0x00, 0x00, ..] => Some(self.warm_up_reply(3)),
            [0x12, 0x06, 0x00, 0x01, lines, ..] => Some(self.block_reply(1, *lines as usize)),
            [0x18, 0x07, 0x00, 0x01, lines, ..] => Some(self.block_reply(3, *lines as usize)),
            [0x21, 0x02, 0x00, 0x0a, 0x00] => {
                self.power_downs.fetch_add(1, Ordering::SeqCst);
                Some(vec![0u8; POWER_DOWN_REPLY])
            }
            _ => {
                debug!(device = %self.config.name, cmd = %hex::encode(cmd), "Mock: unknown command");
                None
            }
        };
        self.state.lock().pending = reply;
    }

    fn calibration_reply(&self) -> Vec<u8> {
        let mut reply = self.header();
        for plane in 0..8 {
            let level = if plane % 2 == 0 {
                self.config.dark_level
            } else {
                self.config.light_level
            };
            reply.extend(std::iter::repeat(level).take(PIXELS_PER_LINE));
        }
        if self.config.truncate_calibration {
            reply.truncate(reply.len() / 2);
        }
        reply
    }

    fn warm_up_reply(&self, lamps: usize) -> Vec<u8> {
        let poll = self.warm_up_polls.fetch_add(1, Ordering::SeqCst);
        let lamp = if poll < self.config.cold_polls as usize {
            LAMP_COLD
        } else {
            LAMP_HOT
        };

        // every poll starts a fresh page
        let mut state = self.state.lock();
        state.stream_pos = 0;
        state.stream_line_bytes = PIXELS_PER_LINE * lamps;
        state.not_ready_left = self.config.not_ready_blocks;
        drop(state);

        let mut reply = self.header();
        reply.extend(std::iter::repeat(lamp).take(lamps));
        reply
    }

    fn block_reply(&self, channels: usize, lines: usize) -> Vec<u8> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.not_ready_left > 0 {
            state.not_ready_left -= 1;
            return Vec::new();
        }

        let line_bytes = PIXELS_PER_LINE * channels;
        if state.stream_line_bytes != line_bytes {
            state.stream_pos = 0;
            state.stream_line_bytes = line_bytes;
        }
        let start_line = state.stream_pos / line_bytes;
        let mut len = lines * line_bytes;
        if let Some(chunk) = self.config.chunk_bytes {
            len = len.min(chunk.max(1));
        }

        let mut reply = self.header();
        if start_line >= self.config.page_lines {
            reply[1] = 0;
        }
        reply.reserve(len);
        for pos in state.stream_pos..state.stream_pos + len {
            let y = pos / line_bytes;
            let offset = pos % line_bytes;
            let (plane, x) = (offset / PIXELS_PER_LINE, offset % PIXELS_PER_LINE);
            reply.push(self.raw_sample(plane, x, y));
        }
        state.stream_pos += len;
        reply
    }
}

// =============================================================================
// Connection
// =============================================================================

struct MockConnection {
    device: Arc<MockDevice>,
    latency: Duration,
    closed: bool,
}

impl MockConnection {
    async fn check(&self) -> Result<(), TransportError> {
        if self.closed || self.device.is_unplugged() {
            return Err(TransportError::ConnectionClosed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceConnection for MockConnection {
    async fn write_bulk(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.check().await?;
        self.device.handle_command(data);
        Ok(data.len())
    }

    async fn read_bulk(
        &mut self,
        _capacity: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.check().await?;
        let pending = self.device.state.lock().pending.take();
        pending.ok_or_else(|| {
            TransportError::Timeout(format!("no reply within {} ms", timeout.as_millis()))
        })
    }

    fn usb_ids(&self) -> UsbIds {
        self.device.ids()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.device.open.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.device.open.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CARDSCAN: UsbIds = UsbIds::new(0x08f0, 0x0005);

    #[tokio::test]
    async fn test_enumerate_by_ids() {
        let transport = MockTransport::with_devices(vec![
            MockDeviceConfig::default(),
            MockDeviceConfig {
                name: "mock:001:003".into(),
                product_id: 0x0002,
                ..Default::default()
            },
        ]);
        assert_eq!(transport.enumerate(CARDSCAN).await.unwrap(), vec!["mock:001:002"]);
        assert!(transport.enumerate(UsbIds::new(1, 2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_is_exclusive_until_closed() {
        let transport = MockTransport::with_devices(vec![MockDeviceConfig::default()]);
        let mut conn = transport.open("mock:001:002").await.unwrap();
        assert!(matches!(
            transport.open("mock:001:002").await,
            Err(TransportError::Busy(_))
        ));
        conn.close().await.unwrap();
        drop(transport.open("mock:001:002").await.unwrap());
        // dropping releases the claim too
        assert!(transport.open("mock:001:002").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_command_times_out() {
        let transport = MockTransport::with_devices(vec![MockDeviceConfig::default()]);
        let mut conn = transport.open("mock:001:002").await.unwrap();
        conn.write_bulk(&[0x99], Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            conn.read_bulk(16, Duration::from_secs(1)).await,
            Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_unplugged_device_is_closed() {
        let transport = MockTransport::with_devices(vec![MockDeviceConfig::default()]);
        let mut conn = transport.open("mock:001:002").await.unwrap();
        transport.device("mock:001:002").unwrap().unplug();
        assert_eq!(
            conn.write_bulk(&[0x45, 0, 0], Duration::from_secs(1)).await,
            Err(TransportError::ConnectionClosed)
        );
        assert!(transport.enumerate(CARDSCAN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunked_stream_continues_across_blocks() {
        let transport = MockTransport::with_devices(vec![MockDeviceConfig {
            chunk_bytes: Some(1000),
            ..Default::default()
        }]);
        let device = transport.device("mock:001:002").unwrap();
        let mut conn = transport.open("mock:001:002").await.unwrap();
        let timeout = Duration::from_secs(1);

        conn.write_bulk(&[0x12, 0x06, 0x00, 0x00, 0x01, 0x60, 0x00, 0x61, 0x00], timeout)
            .await
            .unwrap();
        conn.read_bulk(HEADER_SIZE + 1, timeout).await.unwrap();

        let cmd = [0x12, 0x06, 0x00, 0x01, 0x01, 0x60, 0x00, 0x18, 0x05];
        conn.write_bulk(&cmd, timeout).await.unwrap();
        let first = conn.read_bulk(HEADER_SIZE + PIXELS_PER_LINE, timeout).await.unwrap();
        conn.write_bulk(&cmd, timeout).await.unwrap();
        let second = conn.read_bulk(HEADER_SIZE + PIXELS_PER_LINE, timeout).await.unwrap();

        assert_eq!(first.len(), HEADER_SIZE + 1000);
        assert_eq!(second[HEADER_SIZE], device.raw_sample(0, 1000, 0));
        assert_eq!(second[HEADER_SIZE + 208], device.raw_sample(0, 0, 1));
    }
}
