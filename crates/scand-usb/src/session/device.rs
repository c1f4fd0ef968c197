//! ScanSession - the ScanDevice implementation for USB scanners

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use scand_core::{
    CancelFlag, CancelHandle, ChangeFlags, ControlOutcome, OptionAction, OptionDescriptor,
    OptionId, ScanDevice, ScanError, ScanParameters, ScanResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::SessionState;
use crate::calibration::CalibrationSet;
use crate::command::CommandTransaction;
use crate::config::BackendConfig;
use crate::options::DeviceOptions;
use crate::pipeline::{AcquisitionPipeline, AcquisitionWorker};
use crate::profile::{DeviceProfile, RawMode, WarmUpState};
use crate::registry::{AttachedDevice, DeviceClaim};
use crate::retry::RetryPolicy;

/// Backend settings a session runs with
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub warm_up: RetryPolicy,
    pub idle: RetryPolicy,
    /// Acquire on a background task
    pub worker: bool,
    pub channel_depth: usize,
}

impl From<&BackendConfig> for SessionSettings {
    fn from(config: &BackendConfig) -> Self {
        Self {
            warm_up: config.warm_up.policy(),
            idle: config.idle.policy(),
            worker: config.acquisition.worker,
            channel_depth: config.acquisition.channel_depth,
        }
    }
}

enum Acquisition {
    Direct(AcquisitionPipeline),
    Worker(AcquisitionWorker),
}

/// An open device and the scan running on it
pub struct ScanSession {
    name: String,
    profile: Arc<dyn DeviceProfile>,
    calibration: Arc<CalibrationSet>,
    options: DeviceOptions,
    tx: Arc<Mutex<CommandTransaction>>,
    settings: SessionSettings,
    state: SessionState,
    cancel: CancelFlag,
    acquisition: Option<Acquisition>,
    /// Parameters captured at `start`
    scan_params: Option<ScanParameters>,
    non_blocking: bool,
    bytes_delivered: usize,
    claim: Option<DeviceClaim>,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("non_blocking", &self.non_blocking)
            .finish()
    }
}

impl ScanSession {
    /// Bind a session to an opened device
    ///
    /// Runs the deferred calibration when the device was attached without
    /// one.
    pub async fn open(
        device: &AttachedDevice,
        mut tx: CommandTransaction,
        settings: SessionSettings,
        claim: DeviceClaim,
    ) -> ScanResult<Self> {
        let options = match DeviceOptions::new(device.profile.as_ref(), &device.settings) {
            Ok(options) => options,
            Err(e) => {
                if let Err(close_err) = tx.close().await {
                    warn!(error = %close_err, "Failed to close device after option setup error");
                }
                return Err(e);
            }
        };
        let calibration = match &device.calibration {
            Some(calibration) => calibration.clone(),
            None => {
                debug!(device = %device.info.name, "Loading calibration for this session");
                match device.profile.load_calibration(&mut tx).await {
                    Ok(calibration) => Arc::new(calibration),
                    Err(e) => {
                        if let Err(close_err) = tx.close().await {
                            warn!(error = %close_err, "Failed to close device after calibration error");
                        }
                        return Err(e);
                    }
                }
            }
        };

        let mut session = Self {
            name: device.info.name.clone(),
            profile: device.profile.clone(),
            calibration,
            options,
            tx: Arc::new(Mutex::new(tx)),
            settings,
            state: SessionState::Idle,
            cancel: CancelFlag::new(),
            acquisition: None,
            scan_params: None,
            non_blocking: false,
            bytes_delivered: 0,
            claim: Some(claim),
        };
        session.state = SessionState::Opened;
        info!(device = %session.name, model = %device.info.model, "Session opened");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Image bytes handed out since the last `start`
    pub fn bytes_delivered(&self) -> usize {
        self.bytes_delivered
    }

    fn ensure_open(&self) -> ScanResult<()> {
        if matches!(self.state, SessionState::Closed | SessionState::Idle) {
            return Err(ScanError::invalid(format!("device '{}' is not open", self.name)));
        }
        if self.claim.as_ref().is_some_and(DeviceClaim::is_revoked) {
            return Err(ScanError::invalid("backend has been torn down"));
        }
        Ok(())
    }

    /// Finish a cancel requested through a `CancelHandle`
    async fn sync_cancel(&mut self) -> bool {
        if self.state.is_scanning() && self.cancel.is_cancelled() {
            debug!(device = %self.name, "Cancel requested from another task");
            self.abort_scan().await;
            return true;
        }
        false
    }

    async fn warm_up(&mut self, mode: RawMode) -> ScanResult<()> {
        let policy = self.settings.warm_up;
        let ready = policy
            .retry(&self.cancel, |attempt| {
                let tx = self.tx.clone();
                let profile = self.profile.clone();
                async move {
                    let mut tx = tx.lock().await;
                    match profile.warm_up(&mut tx, mode).await? {
                        WarmUpState::Ready => {
                            debug!(attempt, "Lamp ready");
                            Ok(Some(()))
                        }
                        WarmUpState::Cold => {
                            debug!(attempt, "Lamp still warming up");
                            Ok(None)
                        }
                        WarmUpState::NoMedia => {
                            Err(ScanError::NoDocs("no card in the feeder".to_string()))
                        }
                    }
                }
            })
            .await?;
        ready.ok_or_else(|| {
            ScanError::DeviceBusy(format!("lamp not ready after {} polls", policy.max_attempts))
        })
    }

    async fn stop_acquisition(&mut self) {
        match self.acquisition.take() {
            Some(Acquisition::Worker(mut worker)) => {
                if let Some(stats) = worker.stop().await {
                    debug!(?stats, "Acquisition worker stopped");
                }
            }
            Some(Acquisition::Direct(pipeline)) => {
                debug!(stats = ?pipeline.stats(), "Acquisition stopped");
            }
            None => {}
        }
    }

    /// Started/Reading → Cancelling → Opened
    async fn abort_scan(&mut self) {
        self.state = SessionState::Cancelling;
        self.cancel.cancel();
        self.stop_acquisition().await;

        let mut tx = self.tx.lock().await;
        match self.profile.abort(&mut tx).await {
            Ok(true) => debug!("Device acquisition aborted"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Abort command failed"),
        }
        drop(tx);

        self.cancel.reset();
        self.scan_params = None;
        self.state = SessionState::Opened;
        info!(device = %self.name, "Scan cancelled");
    }

    /// End of page: put the device to sleep and wait for the next `start`
    async fn finish_page(&mut self) {
        self.stop_acquisition().await;
        let mut tx = self.tx.lock().await;
        if let Err(e) = self.profile.power_down(&mut tx).await {
            warn!(error = %e, "Power-down failed");
        }
        drop(tx);

        self.scan_params = None;
        self.state = SessionState::Finished;
        info!(device = %self.name, bytes = self.bytes_delivered, "Page finished");
    }

    async fn next_chunk(&mut self, max_len: usize) -> ScanResult<Bytes> {
        match self.acquisition.as_mut() {
            Some(Acquisition::Direct(pipeline)) => {
                if pipeline.available() == 0 {
                    let mut tx = self.tx.lock().await;
                    pipeline.fill(&mut tx).await?;
                }
                Ok(pipeline.consume(max_len))
            }
            Some(Acquisition::Worker(worker)) => worker.read(max_len, self.non_blocking).await,
            None => Err(ScanError::Cancelled),
        }
    }
}

#[async_trait]
impl ScanDevice for ScanSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe_option(&self, id: OptionId) -> Option<&OptionDescriptor> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.options.describe(id)
    }

    async fn control_option(
        &mut self,
        id: OptionId,
        action: OptionAction,
    ) -> ScanResult<ControlOutcome> {
        self.ensure_open()?;
        self.sync_cancel().await;

        if matches!(action, OptionAction::Get) {
            return Ok(ControlOutcome {
                value: Some(self.options.get(id)?),
                flags: ChangeFlags::empty(),
            });
        }
        if self.state.is_scanning() {
            return Err(ScanError::DeviceBusy(
                "options cannot change while scanning".to_string(),
            ));
        }

        self.state = SessionState::Configuring;
        let result = match action {
            OptionAction::Set(value) => self.options.set(id, value),
            _ => self.options.set_auto(id),
        };
        self.state = SessionState::Opened;

        let flags = result?;
        Ok(ControlOutcome {
            value: Some(self.options.get(id)?),
            flags,
        })
    }

    fn get_parameters(&self) -> ScanResult<ScanParameters> {
        self.ensure_open()?;
        match self.scan_params {
            Some(params) if self.state.is_scanning() => Ok(params),
            _ => self.options.parameters(),
        }
    }

    async fn start(&mut self) -> ScanResult<()> {
        self.ensure_open()?;
        if self.state.is_scanning() {
            self.abort_scan().await;
            return Err(ScanError::Cancelled);
        }
        if !self.state.can_start() {
            return Err(ScanError::invalid(format!("cannot start while {}", self.state)));
        }

        let window = self.options.window()?;
        self.cancel.reset();
        self.bytes_delivered = 0;
        self.scan_params = Some(window.parameters());
        self.state = SessionState::Started;
        info!(device = %self.name, mode = %window.mode, "Starting scan");

        if let Err(e) = self.warm_up(window.mode.raw_mode()).await {
            warn!(error = %e, "Warm-up failed");
            self.abort_scan().await;
            return Err(e);
        }

        let pipeline = AcquisitionPipeline::new(
            self.profile.clone(),
            &self.calibration,
            window,
            self.settings.idle,
            self.cancel.clone(),
        );
        self.acquisition = Some(if self.settings.worker {
            Acquisition::Worker(AcquisitionWorker::spawn(
                pipeline,
                self.tx.clone(),
                self.settings.channel_depth,
            ))
        } else {
            Acquisition::Direct(pipeline)
        });
        Ok(())
    }

    async fn read(&mut self, max_len: usize) -> ScanResult<Bytes> {
        self.ensure_open()?;
        if self.sync_cancel().await || !self.state.is_scanning() {
            return Err(ScanError::Cancelled);
        }
        self.state = SessionState::Reading;

        match self.next_chunk(max_len).await {
            Ok(chunk) => {
                self.bytes_delivered += chunk.len();
                Ok(chunk)
            }
            Err(ScanError::Eof) => {
                self.finish_page().await;
                Err(ScanError::Eof)
            }
            Err(e) => {
                if !matches!(e, ScanError::Cancelled) {
                    warn!(error = %e, "Acquisition failed");
                }
                self.abort_scan().await;
                Err(e)
            }
        }
    }

    async fn cancel(&mut self) {
        match self.state {
            SessionState::Started | SessionState::Reading => self.abort_scan().await,
            SessionState::Finished => {
                self.cancel.reset();
                self.scan_params = None;
                self.state = SessionState::Opened;
                debug!(device = %self.name, "Finished page dismissed");
            }
            _ => {}
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.handle()
    }

    async fn set_io_mode(&mut self, non_blocking: bool) -> ScanResult<()> {
        self.ensure_open()?;
        if non_blocking && !self.settings.worker {
            return Err(ScanError::Unsupported(
                "non-blocking reads need the acquisition worker".to_string(),
            ));
        }
        self.non_blocking = non_blocking;
        Ok(())
    }

    async fn close(&mut self) -> ScanResult<()> {
        if matches!(self.state, SessionState::Closed) {
            return Ok(());
        }
        if self.state.is_scanning() {
            self.abort_scan().await;
        }
        let result = self.tx.lock().await.close().await;
        self.claim = None;
        self.state = SessionState::Closed;
        info!(device = %self.name, "Session closed");
        result
    }
}
