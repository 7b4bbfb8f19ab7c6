//! Synthetic acquisition driver producing a deterministic sine pattern.
//!
//! Stands in for the hardware ring buffer in tests and bench runs. The
//! generated values are a pure function of channel and sample index, so a
//! test can compute the expected stream by hand.

use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use tracing::debug;

use stream_types::ChannelMask;

use crate::driver::{AdcDriver, DriverError, RawBlock};

/// Peak amplitude of the generated sine, in raw counts.
pub const SINE_AMPLITUDE: f64 = 4096.0;
/// Period of the generated sine, in samples.
pub const SINE_PERIOD: u64 = 64;
/// Bounded wait a stalled pull gives up after.
pub const PULL_TIMEOUT: Duration = Duration::from_millis(500);

const BASE_RATE_HZ: u64 = 125_000_000;

/// Raw count of sample `n` on `channel`. Channels are phase-shifted by a
/// quarter period so a two-channel capture is distinguishable per channel.
pub fn sine_sample(channel: usize, n: u64) -> i32 {
    let phase = (channel as u64 * SINE_PERIOD / 4 + n) % SINE_PERIOD;
    (SINE_AMPLITUDE * (TAU * phase as f64 / SINE_PERIOD as f64).sin()).round() as i32
}

pub struct SineDriver {
    mask: ChannelMask,
    decimation: u32,
    block_samples: usize,
    next_sample: u64,
    blocks_pulled: u64,
    /// Simulate a hardware stall after this many blocks.
    stall_after: Option<u64>,
    closed: bool,
}

impl SineDriver {
    pub fn open(
        mask: ChannelMask,
        decimation: u32,
        block_samples: usize,
    ) -> Result<Self, DriverError> {
        if decimation == 0 {
            return Err(DriverError::Config("decimation must be >= 1".into()));
        }
        if block_samples == 0 {
            return Err(DriverError::Config("block size must be >= 1".into()));
        }
        Ok(Self {
            mask,
            decimation,
            block_samples,
            next_sample: 0,
            blocks_pulled: 0,
            stall_after: None,
            closed: false,
        })
    }

    /// After `blocks` successful pulls the driver behaves like stalled
    /// hardware: `pull` waits out its window and reports a timeout.
    pub fn with_stall_after(mut self, blocks: u64) -> Self {
        self.stall_after = Some(blocks);
        self
    }

    fn generate(&mut self, samples: usize) -> RawBlock {
        let mut channels = Vec::with_capacity(self.mask.count() as usize);
        for ch in [0usize, 1] {
            let enabled = match ch {
                0 => self.mask.has_ch1(),
                _ => self.mask.has_ch2(),
            };
            if !enabled {
                continue;
            }
            let block: Vec<i32> = (0..samples as u64)
                .map(|i| sine_sample(ch, self.next_sample + i))
                .collect();
            channels.push(block);
        }
        self.next_sample += samples as u64;
        RawBlock { channels }
    }
}

impl AdcDriver for SineDriver {
    fn pull(&mut self) -> Result<RawBlock, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if let Some(limit) = self.stall_after {
            if self.blocks_pulled >= limit {
                thread::sleep(PULL_TIMEOUT);
                return Err(DriverError::Timeout(PULL_TIMEOUT));
            }
        }
        // Pace the producer to the decimated rate. At realistic
        // decimations for this block size the delay rounds to zero.
        let block_ns =
            self.block_samples as u64 * self.decimation as u64 * 1_000_000_000 / BASE_RATE_HZ;
        if block_ns > 0 {
            thread::sleep(Duration::from_nanos(block_ns));
        }
        self.blocks_pulled += 1;
        Ok(self.generate(self.block_samples))
    }

    fn drain(&mut self) -> Option<RawBlock> {
        if self.closed {
            return None;
        }
        let remainder = self.block_samples / 2;
        if remainder == 0 {
            return None;
        }
        Some(self.generate(remainder))
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(blocks = self.blocks_pulled, "sine driver closed");
            self.closed = true;
        }
    }
}
