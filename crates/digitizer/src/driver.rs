//! The blocking-pull contract the producer loop drives.
//!
//! Register-level hardware access lives in the external FPGA driver; this
//! trait only exposes "give me the next block of raw counts per enabled
//! channel", bounded by a timeout so a hardware stall cannot hang the
//! producer forever.

use std::time::Duration;

use thiserror::Error;

/// One block of raw ADC counts, one `Vec` per enabled channel, in channel
/// order. All channels carry the same number of samples.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub channels: Vec<Vec<i32>>,
}

impl RawBlock {
    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    /// The hardware ring buffer produced nothing within the window.
    /// Fatal to the session.
    #[error("hardware timeout: no block within {0:?}")]
    Timeout(Duration),
    #[error("hardware fault: {0}")]
    Hardware(String),
    #[error("invalid driver configuration: {0}")]
    Config(String),
    /// `pull` after `close`.
    #[error("driver closed")]
    Closed,
}

/// Acquisition adapter contract. Open semantics live in the concrete
/// driver's constructor.
pub trait AdcDriver: Send {
    /// Block until a full block is available, or fail with
    /// [`DriverError::Timeout`] after the driver's bounded window.
    fn pull(&mut self) -> Result<RawBlock, DriverError>;

    /// Hand back whatever partial block the hardware still buffers.
    /// Called once while draining a graceful stop.
    fn drain(&mut self) -> Option<RawBlock> {
        None
    }

    /// Release hardware resources. Safe to call more than once and after
    /// a pull error.
    fn close(&mut self);
}
