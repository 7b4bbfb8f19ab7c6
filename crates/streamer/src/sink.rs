//! The terminal consumer contract. Exactly one sink is active per
//! session, selected at session start.

use std::io;

use thiserror::Error;

use stream_types::SampleFrame;

use crate::queue::OverflowPolicy;

/// Outcome of a successful frame write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    /// The sink reached its configured end (sample cap) and accepts no
    /// further frames.
    Complete,
}

#[derive(Error, Debug)]
pub enum SinkError {
    /// File write failed after the bounded retries.
    #[error("file sink failed: {0}")]
    File(io::Error),
    /// Socket error. Never retried; the session is torn down.
    #[error("network sink failed: {0}")]
    Net(io::Error),
}

pub trait Sink: Send {
    fn write_frame(&mut self, frame: &SampleFrame) -> Result<SinkStatus, SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;

    /// Backpressure policy appropriate for this sink kind.
    fn overflow_policy(&self) -> OverflowPolicy;
}
