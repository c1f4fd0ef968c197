//! Acquisition pipeline: block requests, reassembly and rendering
//!
//! The device hands out blocks that need not end on a line boundary. The
//! pipeline keeps the partial tail, renders every whole line through the
//! calibration and the scan window, and stages the result for the reader.
//!
//! The page ends when the rows below the window are reached, or once the
//! paper sensor has reported no paper for the profile's trailing-blank limit.

pub mod buffer;
pub mod render;
pub mod worker;

pub use buffer::AcquisitionBuffer;
pub use render::LineRenderer;
pub use worker::AcquisitionWorker;

use std::sync::Arc;

use bytes::Bytes;
use scand_core::{CancelFlag, ScanError, ScanResult};
use tracing::{debug, trace};

use crate::calibration::CalibrationSet;
use crate::command::CommandTransaction;
use crate::options::ScanWindow;
use crate::profile::{BlockStatus, DeviceProfile, RawBlock, RawMode};
use crate::retry::RetryPolicy;

/// Running totals of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub blocks: usize,
    pub raw_lines: usize,
    pub bytes_produced: usize,
    pub bytes_delivered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndOfPage {
    /// Rows below the window reached
    Window,
    /// Paper sensor reported no paper for long enough
    Paperless,
}

/// Pulls one page from the device
#[derive(Debug)]
pub struct AcquisitionPipeline {
    profile: Arc<dyn DeviceProfile>,
    raw_mode: RawMode,
    window: ScanWindow,
    renderer: LineRenderer,
    buffer: AcquisitionBuffer,
    raw_line_bytes: usize,
    leftover: Vec<u8>,
    line: Vec<u8>,
    row: usize,
    paperless: usize,
    end: Option<EndOfPage>,
    idle: RetryPolicy,
    cancel: CancelFlag,
    stats: PipelineStats,
}

impl AcquisitionPipeline {
    pub fn new(
        profile: Arc<dyn DeviceProfile>,
        calibration: &CalibrationSet,
        window: ScanWindow,
        idle: RetryPolicy,
        cancel: CancelFlag,
    ) -> Self {
        let raw_mode = window.mode.raw_mode();
        let layout = profile.channel_layout(raw_mode);
        let calibration = match raw_mode {
            RawMode::Gray => calibration.gray.clone(),
            RawMode::Color => calibration.color.clone(),
        };
        let renderer = LineRenderer::new(calibration, layout, &window);
        let buffer = AcquisitionBuffer::new(renderer.output_bytes(), window.block_lines + 1);
        let raw_line_bytes = profile.raw_line_bytes(raw_mode);

        Self {
            profile,
            raw_mode,
            window,
            renderer,
            buffer,
            raw_line_bytes,
            leftover: Vec::with_capacity(raw_line_bytes),
            line: Vec::new(),
            row: 0,
            paperless: 0,
            end: None,
            idle,
            cancel,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Bytes staged and not yet consumed
    pub fn available(&self) -> usize {
        self.buffer.available()
    }

    /// Stage the next scanlines, returning how many are available
    ///
    /// Does nothing while staged lines remain. Returns `Err(Eof)` once the
    /// page is over.
    pub async fn fill(&mut self, tx: &mut CommandTransaction) -> ScanResult<usize> {
        if !self.buffer.is_drained() {
            return Ok(self.staged_lines());
        }
        self.buffer.clear();

        loop {
            self.cancel.check()?;
            self.check_end()?;

            let block = self.next_block(tx).await?;
            self.stats.blocks += 1;
            let BlockStatus::Data { media_present } = block.status else {
                continue;
            };
            if !media_present {
                self.paperless += block.lines;
                debug!(paperless = self.paperless, "No paper under the sensor");
            }
            self.reassemble(&block.payload)?;

            if self.buffer.available() > 0 {
                return Ok(self.staged_lines());
            }
        }
    }

    /// Take at most `max` staged bytes; never waits
    pub fn consume(&mut self, max: usize) -> Bytes {
        let chunk = self.buffer.consume(max);
        self.stats.bytes_delivered += chunk.len();
        chunk
    }

    fn staged_lines(&self) -> usize {
        self.buffer.available().div_ceil(self.buffer.line_bytes().max(1))
    }

    fn check_end(&mut self) -> ScanResult<()> {
        if self.end.is_none() && self.paperless >= self.profile.trailing_blank_limit() {
            self.end = Some(EndOfPage::Paperless);
        }
        match self.end {
            None => Ok(()),
            Some(EndOfPage::Paperless) if !self.leftover.is_empty() => Err(ScanError::io(format!(
                "page ended with {} bytes of a partial scanline",
                self.leftover.len()
            ))),
            Some(end) => {
                debug!(?end, rows = self.row, "End of page");
                Err(ScanError::Eof)
            }
        }
    }

    /// One block request, waiting out blocks the device has no data for
    async fn next_block(&mut self, tx: &mut CommandTransaction) -> ScanResult<RawBlock> {
        let mut attempts = self.idle.attempts();
        while attempts.next(&self.cancel).await?.is_some() {
            let block = self
                .profile
                .request_block(tx, self.raw_mode, self.window.block_lines)
                .await?;
            self.cancel.check()?;
            if block.status != BlockStatus::NotReady {
                return Ok(block);
            }
            trace!(attempt = attempts.made(), "Device has no data yet");
        }
        Err(ScanError::DeviceBusy(format!(
            "no data after {} block requests",
            attempts.made()
        )))
    }

    fn reassemble(&mut self, payload: &[u8]) -> ScanResult<()> {
        let mut payload = payload;

        if !self.leftover.is_empty() {
            let missing = self.raw_line_bytes - self.leftover.len();
            let take = missing.min(payload.len());
            self.leftover.extend_from_slice(&payload[..take]);
            payload = &payload[take..];
            if self.leftover.len() < self.raw_line_bytes {
                return Ok(());
            }
            let line = std::mem::take(&mut self.leftover);
            self.emit(&line)?;
            self.leftover = line;
            self.leftover.clear();
        }

        let mut lines = payload.chunks_exact(self.raw_line_bytes);
        for raw in &mut lines {
            self.emit(raw)?;
        }
        self.leftover.extend_from_slice(lines.remainder());
        Ok(())
    }

    fn emit(&mut self, raw: &[u8]) -> ScanResult<()> {
        self.stats.raw_lines += 1;
        if self.end.is_some() {
            return Ok(());
        }
        let row = self.row;
        self.row += 1;
        if row >= self.window.bottom {
            self.end = Some(EndOfPage::Window);
            return Ok(());
        }
        if row >= self.window.top {
            let mut line = std::mem::take(&mut self.line);
            self.renderer.render(raw, &mut line)?;
            self.buffer.push_line(&line)?;
            self.stats.bytes_produced += line.len();
            self.line = line;
        }
        if self.row >= self.window.bottom {
            self.end = Some(EndOfPage::Window);
        }
        Ok(())
    }
}
