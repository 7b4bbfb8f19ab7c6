//! Session configuration. A `StreamConfig` is validated once, before a
//! session starts, and is immutable for the lifetime of the session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Packed sample width of the outgoing stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Bits8,
    Bits16,
}

impl Resolution {
    pub fn bits(self) -> u8 {
        match self {
            Resolution::Bits8 => 8,
            Resolution::Bits16 => 16,
        }
    }

    /// Bytes per packed sample.
    pub fn sample_bytes(self) -> usize {
        match self {
            Resolution::Bits8 => 1,
            Resolution::Bits16 => 2,
        }
    }
}

/// Which acquisition channels are enabled for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMask {
    Ch1,
    Ch2,
    Both,
}

impl ChannelMask {
    pub fn count(self) -> u8 {
        match self {
            ChannelMask::Ch1 | ChannelMask::Ch2 => 1,
            ChannelMask::Both => 2,
        }
    }

    pub fn has_ch1(self) -> bool {
        matches!(self, ChannelMask::Ch1 | ChannelMask::Both)
    }

    pub fn has_ch2(self) -> bool {
        matches!(self, ChannelMask::Ch2 | ChannelMask::Both)
    }
}

/// Terminal consumer of the sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Tcp,
    Udp,
    File,
}

/// On-disk format for file-sink sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Packed samples, interleaved by channel.
    #[default]
    Raw,
    /// Raw capture during the session, bulk-converted to CSV afterwards.
    Csv,
    /// Chunked waveform container with a self-describing header.
    Wav,
}

/// Whether a file capture grows a single file or rotates bounded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    #[default]
    Single,
    Rotating {
        samples_per_file: u64,
    },
}

/// Input attenuator setting, on boards that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Attenuator {
    #[default]
    A1x1,
    A1x20,
}

/// Immutable descriptor of one streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory receiving file captures.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// File name stem for captures; extension comes from the format.
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
    pub resolution: Resolution,
    /// Integer divisor of the board's base sample rate.
    #[serde(default = "default_decimation")]
    pub decimation: u32,
    pub channels: ChannelMask,
    #[serde(default)]
    pub attenuator: Attenuator,
    #[serde(default)]
    pub format: FileFormat,
    #[serde(default)]
    pub save_mode: SaveMode,
    /// Stop after this many samples per channel have been delivered.
    #[serde(default)]
    pub sample_cap: Option<u64>,
    /// Capacity of the frame queue between producer and sink.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8900
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("/tmp/stream_files")
}

fn default_file_stem() -> String {
    "capture".to_string()
}

fn default_decimation() -> u32 {
    1
}

fn default_queue_capacity() -> usize {
    64
}

impl StreamConfig {
    /// Reject invalid configurations before a session starts. A config
    /// that passes here never produces a config error mid-stream.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decimation == 0 {
            return Err(ConfigError::Invalid("decimation must be >= 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be >= 1".into()));
        }
        if let Some(cap) = self.sample_cap {
            if cap == 0 {
                return Err(ConfigError::Invalid("sample cap must be >= 1".into()));
            }
        }
        match self.transport {
            TransportKind::Tcp | TransportKind::Udp => {
                if self.host.is_empty() {
                    return Err(ConfigError::Invalid("network sink needs a host".into()));
                }
                if self.port == 0 {
                    return Err(ConfigError::Invalid("network sink needs a port".into()));
                }
            }
            TransportKind::File => {
                if self.file_stem.is_empty() {
                    return Err(ConfigError::Invalid("file sink needs a file stem".into()));
                }
                if let SaveMode::Rotating { samples_per_file } = self.save_mode {
                    if samples_per_file == 0 {
                        return Err(ConfigError::Invalid(
                            "rotating save mode needs samples_per_file >= 1".into(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_config() -> StreamConfig {
        StreamConfig {
            transport: TransportKind::Tcp,
            host: default_host(),
            port: 8900,
            out_dir: default_out_dir(),
            file_stem: default_file_stem(),
            resolution: Resolution::Bits16,
            decimation: 1,
            channels: ChannelMask::Both,
            attenuator: Attenuator::A1x1,
            format: FileFormat::Raw,
            save_mode: SaveMode::Single,
            sample_cap: None,
            queue_capacity: 64,
        }
    }

    #[test]
    fn valid_tcp_config_passes() {
        assert!(tcp_config().validate().is_ok());
    }

    #[test]
    fn zero_decimation_rejected() {
        let mut cfg = tcp_config();
        cfg.decimation = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_port_rejected_for_network() {
        let mut cfg = tcp_config();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rotating_needs_nonzero_limit() {
        let mut cfg = tcp_config();
        cfg.transport = TransportKind::File;
        cfg.save_mode = SaveMode::Rotating { samples_per_file: 0 };
        assert!(cfg.validate().is_err());
        cfg.save_mode = SaveMode::Rotating { samples_per_file: 100 };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn channel_mask_counts() {
        assert_eq!(ChannelMask::Both.count(), 2);
        assert!(ChannelMask::Ch2.has_ch2());
        assert!(!ChannelMask::Ch2.has_ch1());
    }
}
