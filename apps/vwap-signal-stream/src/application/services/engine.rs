//! Stream Engine
//!
//! Owns the [`TickPipeline`] and is its only mutator. Raw frames and
//! dispatch outcomes are joined on one task, so aggregator state needs no
//! locking and the latch transitions happen in a single order.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::pipeline::TickPipeline;
use crate::application::ports::DispatchOutcome;

/// Why the engine loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// Shutdown was requested.
    Cancelled,
    /// The frame source closed.
    FeedClosed,
}

/// Single-task ingestion loop.
#[derive(Debug)]
pub struct StreamEngine {
    pipeline: TickPipeline,
    frames: mpsc::Receiver<Vec<u8>>,
    outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
    cancel: CancellationToken,
}

impl StreamEngine {
    /// Create an engine over a frame source and a dispatch outcome source.
    #[must_use]
    pub const fn new(
        pipeline: TickPipeline,
        frames: mpsc::Receiver<Vec<u8>>,
        outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            frames,
            outcomes,
            cancel,
        }
    }

    /// Run until cancelled or the frame source closes.
    ///
    /// Returns the pipeline so callers can inspect final state.
    pub async fn run(mut self) -> (TickPipeline, EngineExit) {
        tracing::info!("Stream engine started");

        let exit = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break EngineExit::Cancelled,

                Some(outcome) = self.outcomes.recv() => {
                    self.pipeline.on_dispatch_outcome(outcome);
                }

                frame = self.frames.recv() => {
                    let Some(frame) = frame else {
                        break EngineExit::FeedClosed;
                    };
                    // Decode errors are counted and logged by the pipeline.
                    let _ = self.pipeline.process_frame(&frame);
                }
            }
        };

        // Outcomes that already arrived still settle the latch.
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.pipeline.on_dispatch_outcome(outcome);
        }

        tracing::info!(?exit, "Stream engine stopped");
        (self.pipeline, exit)
    }
}
