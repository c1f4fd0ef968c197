//! Background acquisition task feeding a bounded channel

use std::sync::Arc;

use bytes::Bytes;
use scand_core::{CancelFlag, ScanError, ScanResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AcquisitionPipeline, PipelineStats};
use crate::command::CommandTransaction;

/// Runs a pipeline on its own task
///
/// Chunks travel through a channel of `depth` entries, so the device is never
/// more than `depth` chunks ahead of the reader. The final message is the
/// error that ended the page (`Eof` on a normal finish).
#[derive(Debug)]
pub struct AcquisitionWorker {
    rx: Option<mpsc::Receiver<ScanResult<Bytes>>>,
    pending: Bytes,
    task: Option<JoinHandle<PipelineStats>>,
    cancel: CancelFlag,
    delivered: usize,
}

impl AcquisitionWorker {
    pub fn spawn(
        mut pipeline: AcquisitionPipeline,
        tx: Arc<Mutex<CommandTransaction>>,
        depth: usize,
    ) -> Self {
        let (sender, rx) = mpsc::channel(depth.max(1));
        let cancel = pipeline.cancel_flag().clone();

        let task = tokio::spawn(async move {
            loop {
                let filled = {
                    let mut tx = tx.lock().await;
                    pipeline.fill(&mut tx).await
                };
                if let Err(e) = filled {
                    debug!(error = %e, "Acquisition worker finished");
                    let _ = sender.send(Err(e)).await;
                    break;
                }
                while pipeline.available() > 0 {
                    let chunk = pipeline.consume(usize::MAX);
                    if sender.send(Ok(chunk)).await.is_err() {
                        debug!("Reader went away, stopping acquisition worker");
                        return pipeline.stats();
                    }
                }
            }
            pipeline.stats()
        });

        Self {
            rx: Some(rx),
            pending: Bytes::new(),
            task: Some(task),
            cancel,
            delivered: 0,
        }
    }

    /// Bytes handed to the reader so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Next piece of image data, at most `max_len` bytes
    ///
    /// In non-blocking mode an empty channel yields an empty chunk instead
    /// of waiting.
    pub async fn read(&mut self, max_len: usize, non_blocking: bool) -> ScanResult<Bytes> {
        if self.pending.is_empty() {
            let rx = self
                .rx
                .as_mut()
                .ok_or_else(|| ScanError::invalid("acquisition worker stopped"))?;
            let message = if non_blocking {
                match rx.try_recv() {
                    Ok(message) => Some(message),
                    Err(mpsc::error::TryRecvError::Empty) => return Ok(Bytes::new()),
                    Err(mpsc::error::TryRecvError::Disconnected) => None,
                }
            } else {
                rx.recv().await
            };
            let message = message
                .ok_or_else(|| ScanError::io("acquisition worker ended without a status"))?;
            self.pending = message?;
        }

        let n = max_len.min(self.pending.len());
        self.delivered += n;
        Ok(self.pending.split_to(n))
    }

    /// Stop the task and wait for it to let go of the device
    pub async fn stop(&mut self) -> Option<PipelineStats> {
        self.cancel.cancel();
        // closing the channel unblocks a pending send
        self.rx = None;
        self.pending = Bytes::new();
        let task = self.task.take()?;
        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Acquisition worker failed");
                None
            }
        }
    }
}
