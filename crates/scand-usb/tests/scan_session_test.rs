//! End-to-end scans against simulated CardScan devices
//!
//! Every test builds a backend on a mock transport and drives it only
//! through the public `ScanBackend`/`ScanDevice` API.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rstest::rstest;
use scand_core::{ChangeFlags, FrameFormat, OptionValue, ScanBackend, ScanDevice, ScanError, ScanStatus};
use scand_usb::config::{AcquisitionConfig, MockConfig, MockDeviceConfig, RetryConfig};
use scand_usb::profile::cardscan::PIXELS_PER_LINE;
use scand_usb::transport::mock::{MockDevice, MockTransport};
use scand_usb::{BackendConfig, TransportConfig, UsbScanBackend};
use tokio_test::{assert_err, assert_ok};

const DEVICE: &str = "mock:001:002";

// =============================================================================
// Fixture
// =============================================================================

struct Harness {
    backend: UsbScanBackend,
    transport: Arc<MockTransport>,
}

impl Harness {
    fn new(device: MockDeviceConfig) -> Self {
        Self::with_config(device, BackendConfig::default())
    }

    fn with_config(device: MockDeviceConfig, mut config: BackendConfig) -> Self {
        let mock = MockConfig {
            latency_ms: 0,
            devices: vec![device],
        };
        config.warm_up = RetryConfig {
            max_attempts: 10,
            backoff_ms: 0,
        };
        let transport = Arc::new(MockTransport::new(&mock));
        config.transport = TransportConfig::Mock(mock);
        let backend = UsbScanBackend::with_transport(config, transport.clone());
        Self { backend, transport }
    }

    fn device(&self) -> Arc<MockDevice> {
        self.transport.device(DEVICE).unwrap()
    }

    async fn open(&self) -> Box<dyn ScanDevice> {
        self.backend.list_devices().await.unwrap();
        self.backend.open(DEVICE).await.unwrap()
    }

    /// Expected output sample for gray pixel `x` of scanline `y`
    fn gray(&self, x: usize, y: usize) -> u8 {
        let raw = self.device().raw_sample(0, x, y);
        ((raw - 0x10) as u32 * 255 / 0xe0) as u8
    }
}

/// Read until `Eof`, `chunk` bytes at a time
async fn read_page(device: &mut Box<dyn ScanDevice>, chunk: usize) -> Vec<u8> {
    let mut page = Vec::new();
    loop {
        match device.read(chunk).await {
            Ok(bytes) => {
                assert!(bytes.len() <= chunk);
                page.extend_from_slice(&bytes);
            }
            Err(ScanError::Eof) => return page,
            Err(e) => panic!("read failed: {}", e),
        }
    }
}

async fn set(device: &mut Box<dyn ScanDevice>, name: &str, value: OptionValue) -> ChangeFlags {
    let id = device.find_option(name).unwrap();
    device.set_option(id, value).await.unwrap().flags
}

// =============================================================================
// Warm-up and cancellation
// =============================================================================

#[tokio::test]
async fn test_cold_lamp_gives_up_after_ten_polls() {
    let harness = Harness::new(MockDeviceConfig {
        cold_polls: 1000,
        ..Default::default()
    });
    let mut device = harness.open().await;

    let err = assert_err!(device.start().await);
    assert_eq!(err.status(), ScanStatus::DeviceBusy);
    assert_eq!(harness.device().warm_up_polls(), 10);
    assert_eq!(harness.device().block_requests(), 0);
}

#[tokio::test]
async fn test_lamp_warms_up_within_bound() {
    let harness = Harness::new(MockDeviceConfig {
        cold_polls: 3,
        ..Default::default()
    });
    let mut device = harness.open().await;
    assert_ok!(device.start().await);
    assert_eq!(harness.device().warm_up_polls(), 4);
}

#[tokio::test]
async fn test_cancel_during_fill() {
    // idle waits long enough that only the cancel can end the read
    let config = BackendConfig {
        idle: RetryConfig {
            max_attempts: 100_000,
            backoff_ms: 10,
        },
        ..Default::default()
    };
    let harness = Harness::with_config(
        MockDeviceConfig {
            not_ready_blocks: 100_000,
            ..Default::default()
        },
        config,
    );
    let mut device = harness.open().await;
    assert_ok!(device.start().await);

    let handle = device.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let err = assert_err!(device.read(4096).await);
    assert_eq!(err.status(), ScanStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    canceller.await.unwrap();

    let requests = harness.device().block_requests();
    assert_eq!(assert_err!(device.read(4096).await).status(), ScanStatus::Cancelled);
    assert_eq!(harness.device().block_requests(), requests);
}

#[tokio::test]
async fn test_start_while_started() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;
    assert_ok!(device.start().await);
    assert_ok!(device.read(10).await);

    let err = assert_err!(device.start().await);
    assert_eq!(err.status(), ScanStatus::Cancelled);
    assert_eq!(assert_err!(device.read(10).await).status(), ScanStatus::Cancelled);
    assert_ok!(device.start().await);
}

// =============================================================================
// Data path
// =============================================================================

#[tokio::test]
async fn test_mode_switch_scenario() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;

    let gray = device.get_parameters().unwrap();
    assert_eq!(gray.format, FrameFormat::Gray);
    assert_eq!(gray.bytes_per_line, PIXELS_PER_LINE);

    let flags = set(&mut device, "mode", "Color".into()).await;
    assert!(flags.contains(ChangeFlags::RELOAD_PARAMS));
    let color = device.get_parameters().unwrap();
    assert_eq!(color.format, FrameFormat::Rgb);
    assert_eq!(color.bytes_per_line, gray.bytes_per_line * 3);

    set(&mut device, "br-y", OptionValue::Int(3)).await;
    assert_ok!(device.start().await);
    assert_eq!(device.get_parameters().unwrap(), color);
    let page = read_page(&mut device, 10_000).await;
    assert_eq!(page.len(), 3 * color.bytes_per_line);
}

#[tokio::test]
async fn test_end_of_page_then_next_page() {
    let harness = Harness::new(MockDeviceConfig {
        page_lines: 8,
        ..Default::default()
    });
    let mut device = harness.open().await;
    let estimate = device.get_parameters().unwrap();

    assert_ok!(device.start().await);
    let page = read_page(&mut device, 65_536).await;
    // one block with paper, then blocks until 210 paper-less lines
    let lines = 16 + 210usize.div_ceil(16) * 16;
    assert_eq!(page.len(), lines * PIXELS_PER_LINE);
    assert_eq!(harness.device().power_downs(), 5);
    assert_eq!(assert_err!(device.read(1).await).status(), ScanStatus::Cancelled);

    assert_eq!(device.get_parameters().unwrap(), estimate);
    assert_ok!(device.start().await);
    let second = read_page(&mut device, 65_536).await;
    assert_eq!(second, page);
}

#[tokio::test]
async fn test_reassembly_with_chunked_device() {
    let harness = Harness::new(MockDeviceConfig {
        chunk_bytes: Some(1000),
        ..Default::default()
    });
    let mut device = harness.open().await;
    set(&mut device, "br-y", OptionValue::Int(5)).await;
    set(&mut device, "tl-x", OptionValue::Int(200)).await;
    set(&mut device, "br-x", OptionValue::Int(1000)).await;

    assert_ok!(device.start().await);
    let page = read_page(&mut device, 777).await;
    assert_eq!(page.len(), 5 * 800);
    for y in 0..5 {
        for x in [200, 207, 208, 600, 999] {
            assert_eq!(page[y * 800 + x - 200], harness.gray(x, y), "line {} pixel {}", y, x);
        }
    }
}

#[rstest]
#[case(1)]
#[case(100)]
#[case(1208)]
#[case(5000)]
#[tokio::test]
async fn test_read_sizes_deliver_same_page(#[case] chunk: usize) {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;
    set(&mut device, "br-y", OptionValue::Int(20)).await;
    assert_ok!(device.start().await);

    let page = read_page(&mut device, chunk).await;
    assert_eq!(page.len(), 20 * PIXELS_PER_LINE);
    assert_eq!(page[19 * PIXELS_PER_LINE + 3], harness.gray(3, 19));
}

#[tokio::test]
async fn test_lineart_page() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;
    set(&mut device, "mode", "Lineart".into()).await;
    set(&mut device, "br-y", OptionValue::Int(2)).await;
    let params = device.get_parameters().unwrap();
    assert_eq!(params.depth, 1);

    assert_ok!(device.start().await);
    let page = read_page(&mut device, 4096).await;
    assert_eq!(page.len(), 2 * params.bytes_per_line);

    let black = harness.gray(0, 0) < 128;
    assert_eq!(page[0] & 0x80 != 0, black);
}

// =============================================================================
// Worker mode
// =============================================================================

#[tokio::test]
async fn test_worker_mode_non_blocking_reads() {
    let mut config = BackendConfig::default();
    config.acquisition = AcquisitionConfig {
        worker: true,
        channel_depth: 2,
    };
    let harness = Harness::with_config(
        MockDeviceConfig {
            chunk_bytes: Some(3000),
            ..Default::default()
        },
        config,
    );
    let mut device = harness.open().await;
    set(&mut device, "br-y", OptionValue::Int(12)).await;
    assert_ok!(device.set_io_mode(true).await);
    assert_ok!(device.start().await);

    let mut page = Vec::new();
    let mut empty_reads = 0;
    loop {
        match device.read(2048).await {
            Ok(bytes) if bytes.is_empty() => {
                empty_reads += 1;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(bytes) => page.extend_from_slice(&bytes),
            Err(ScanError::Eof) => break,
            Err(e) => panic!("read failed: {}", e),
        }
        assert!(empty_reads < 10_000, "worker never delivered");
    }
    assert_eq!(page.len(), 12 * PIXELS_PER_LINE);
    assert_eq!(page[11 * PIXELS_PER_LINE], harness.gray(0, 11));
}

#[tokio::test]
async fn test_worker_mode_blocking_reads_and_cancel() {
    let mut config = BackendConfig::default();
    config.acquisition.worker = true;
    let harness = Harness::with_config(MockDeviceConfig::default(), config);
    let mut device = harness.open().await;

    assert_ok!(device.start().await);
    let first = assert_ok!(device.read(100).await);
    assert_eq!(first.len(), 100);
    device.cancel().await;
    assert_eq!(assert_err!(device.read(100).await).status(), ScanStatus::Cancelled);

    // the worker has let go of the device
    assert_ok!(device.start().await);
    assert_ok!(device.read(100).await);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_double_close() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;
    assert_ok!(device.start().await);
    assert_ok!(device.close().await);
    assert_ok!(device.close().await);
    assert!(!harness.device().is_open());
    assert_eq!(assert_err!(device.read(1).await).status(), ScanStatus::Invalid);
    assert!(device.describe_option(scand_core::OptionId::COUNT).is_none());
}

#[tokio::test]
async fn test_exclusive_open() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut first = harness.open().await;
    let err = assert_err!(harness.backend.open(DEVICE).await);
    assert_eq!(err.status(), ScanStatus::DeviceBusy);

    // listing while open keeps the device
    assert_eq!(harness.backend.list_devices().await.unwrap().len(), 1);

    assert_ok!(first.close().await);
    let mut second = assert_ok!(harness.backend.open("").await);
    assert_ok!(second.close().await);
}

#[tokio::test]
async fn test_device_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# no calibration buffer on this unit").unwrap();
    writeln!(file, "has_cal_buffer 0").unwrap();
    writeln!(file, "lines_per_block 4").unwrap();
    writeln!(file, "usb 0x08f0 0x0005").unwrap();

    let config = BackendConfig {
        device_config: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    let harness = Harness::with_config(MockDeviceConfig::default(), config);
    let devices = harness.backend.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert!(harness.backend.registry().find(DEVICE).unwrap().calibration.is_none());

    let mut device = harness.backend.open(DEVICE).await.unwrap();
    let block_lines = device.find_option("block-lines").unwrap();
    assert_eq!(device.get_option(block_lines).await.unwrap(), OptionValue::Int(4));

    set(&mut device, "br-y", OptionValue::Int(4)).await;
    assert_ok!(device.start().await);
    assert_eq!(read_page(&mut device, 8192).await.len(), 4 * PIXELS_PER_LINE);
}

#[tokio::test]
async fn test_unplugged_device_fails_read() {
    let harness = Harness::new(MockDeviceConfig::default());
    let mut device = harness.open().await;
    assert_ok!(device.start().await);
    harness.device().unplug();

    let err = assert_err!(device.read(100).await);
    assert_eq!(err.status(), ScanStatus::IoError);
    assert!(harness.backend.list_devices().await.unwrap().is_empty());
}
