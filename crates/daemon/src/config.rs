//! Daemon configuration, loaded from a TOML file at startup. Stream
//! settings given here are the session defaults; a master may override
//! the overridable subset per session over the command channel.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use stream_types::{BoardModel, CalibrationParams, FilterCoefficients, StreamConfig};

pub const DEFAULT_CONFIG_PORT: u16 = 8901;
pub const DEFAULT_BROADCAST_PORT: u16 = 8902;

/// Calibration constants for one channel, as stored on the device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelCalibration {
    #[serde(default)]
    pub params: CalibrationParams,
    #[serde(default)]
    pub filter: FilterCoefficients,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub board: BoardModel,
    /// TCP port of the command channel.
    #[serde(default = "default_config_port")]
    pub config_port: u16,
    /// UDP port discovery beacons are broadcast to.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Default session settings.
    pub stream: StreamConfig,
    /// Per-channel calibration, indexed by channel. Channels without an
    /// entry run uncalibrated with the filter bypassed.
    #[serde(default)]
    pub calibration: Vec<ChannelCalibration>,
}

fn default_config_port() -> u16 {
    DEFAULT_CONFIG_PORT
}

fn default_broadcast_port() -> u16 {
    DEFAULT_BROADCAST_PORT
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.stream.validate().context("stream settings")?;
        for (ch, cal) in self.calibration.iter().enumerate() {
            cal.filter
                .validate()
                .with_context(|| format!("filter coefficients for channel {}", ch + 1))?;
        }
        if self.calibration.len() > self.board.channel_count() as usize {
            anyhow::bail!(
                "{} calibration entries for a {}-channel board",
                self.calibration.len(),
                self.board.channel_count()
            );
        }
        Ok(())
    }

    /// Calibration for a channel index, defaulting for missing entries.
    pub fn channel_calibration(&self, channel: usize) -> ChannelCalibration {
        self.calibration
            .get(channel)
            .copied()
            .unwrap_or_default()
    }
}
