//! Hosts an [`Output`] on its own thread and feeds it batches.
//!
//! The forwarder owns the output for its whole lifetime, so writes are
//! naturally serialized.

use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::registry::Output;
use crate::{Error, Point};

/// Spawns the forwarder thread.
///
/// The thread connects the output, then writes every batch received on
/// `batches` until `cxl` is cancelled or all senders are dropped, and closes
/// the output on the way out. If connecting fails the thread exits without
/// writing anything.
///
/// # Errors
///
/// Errors if the runtime or the thread cannot be created.
pub fn spawn(
    cxl: CancellationToken,
    output: Box<dyn Output>,
    batches: mpsc::Receiver<Vec<Point>>,
) -> Result<JoinHandle<()>, Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("MetricsPandora".to_string())
        .spawn(move || {
            runtime.block_on(Forwarder { cxl, output, batches, consecutive_failed: 0 }.run());
        })
        .map_err(Into::into)
}

struct Forwarder {
    cxl: CancellationToken,
    output: Box<dyn Output>,
    batches: mpsc::Receiver<Vec<Point>>,
    consecutive_failed: u64,
}

impl Forwarder {
    async fn run(mut self) {
        if let Err(err) = self.output.connect() {
            error!(%err, "Output connect failed, forwarder exiting");

            return;
        }

        loop {
            tokio::select! {
                biased;

                () = self.cxl.cancelled() => break,
                batch = self.batches.recv() => match batch {
                    Some(batch) => self.write(&batch).await,
                    None => break,
                },
            }
        }

        if let Err(err) = self.output.close() {
            warn!(%err, "Output close failed");
        }
        debug!("Forwarder stopped");
    }

    async fn write(&mut self, batch: &[Point]) {
        match self.output.write(batch).await {
            Ok(()) => self.consecutive_failed = 0,
            Err(err) => {
                self.consecutive_failed = self.consecutive_failed.saturating_add(1);
                warn!(self.consecutive_failed, %err, points = batch.len(), "Batch write failed");
            }
        }
    }
}
