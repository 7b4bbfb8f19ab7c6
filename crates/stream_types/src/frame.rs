//! The unit of data flowing from the producer loop to a sink.

use bytes::Bytes;

use crate::config::Resolution;

/// One acquisition cycle's worth of packed samples.
///
/// Frames are created by the producer, queued, consumed by exactly one
/// sink and then dropped. Fields are private so a queued frame cannot be
/// mutated.
#[derive(Debug, Clone)]
pub struct SampleFrame {
    seq: u32,
    resolution: Resolution,
    decimation: u32,
    /// Packed payload per enabled channel, in channel order.
    channels: Vec<Bytes>,
    samples_per_channel: u32,
}

impl SampleFrame {
    pub fn new(
        seq: u32,
        resolution: Resolution,
        decimation: u32,
        channels: Vec<Bytes>,
        samples_per_channel: u32,
    ) -> Self {
        debug_assert!(channels
            .iter()
            .all(|c| c.len() == samples_per_channel as usize * resolution.sample_bytes()));
        Self {
            seq,
            resolution,
            decimation,
            channels,
            samples_per_channel,
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    pub fn channel_count(&self) -> u8 {
        self.channels.len() as u8
    }

    pub fn channels(&self) -> &[Bytes] {
        &self.channels
    }

    pub fn samples_per_channel(&self) -> u32 {
        self.samples_per_channel
    }

    /// Total payload size across all channels in bytes.
    pub fn payload_len(&self) -> u32 {
        self.channels.iter().map(|c| c.len() as u32).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_sums_channels() {
        let frame = SampleFrame::new(
            7,
            Resolution::Bits16,
            8,
            vec![Bytes::from(vec![0u8; 20]), Bytes::from(vec![0u8; 20])],
            10,
        );
        assert_eq!(frame.seq(), 7);
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.payload_len(), 40);
    }
}
