//! Outbound frames held back while the connection is not ready.

use std::collections::VecDeque;

use crate::Error;
use crate::types::Frame;

/// Destination the queue drains into. A send error means the connection is
/// no longer ready.
pub(crate) trait FrameSink {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), Error>;
}

/// Unbounded FIFO of frames awaiting transmission. Never reorders, never
/// deduplicates.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    frames: VecDeque<Frame>,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Send frames from the head until the queue is empty or `sink` fails.
    ///
    /// On the first failure the frame is put back at the head and the error is
    /// returned. Otherwise returns the number of frames written.
    pub(crate) async fn flush<S: FrameSink>(&mut self, sink: &mut S) -> Result<usize, Error> {
        let mut sent = 0;
        while let Some(frame) = self.frames.pop_front() {
            if let Err(e) = sink.send_frame(&frame).await {
                self.frames.push_front(frame);
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }
}
