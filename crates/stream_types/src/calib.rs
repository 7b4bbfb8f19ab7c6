//! Per-channel calibration constants and equalization filter coefficients.
//!
//! Both are read once from the calibration store before a session starts
//! and never mutated while the session runs.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// DC offset and gain correction for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Offset in raw ADC counts.
    pub offset: i32,
    /// Gain against full-scale voltage at the configured bit depth.
    pub gain: f32,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self { offset: 0, gain: 1.0 }
    }
}

/// Convert a stored full-scale gain word into a voltage scale factor.
/// A zero word means the channel was never calibrated and scales by 1.
pub fn calib_full_scale_to_voltage(full_scale_gain: u32) -> f32 {
    if full_scale_gain == 0 {
        return 1.0;
    }
    (full_scale_gain as f64 * 100.0 / (1u64 << 32) as f64) as f32
}

/// Coefficient words are fixed point: `aa`/`bb`/`pp` are Q25, `kk` is Q24.
pub const FILTER_COEFF_Q25: u32 = 1 << 25;
pub const FILTER_COEFF_Q24: u32 = 1 << 24;

/// Fixed-point coefficients of the 2-pole front-end equalization filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCoefficients {
    /// Pole of the first section.
    pub aa: u32,
    /// Zero of the first section.
    pub bb: u32,
    /// Output gain of the second section.
    pub kk: u32,
    /// Pole of the second section.
    pub pp: u32,
    /// When set the filter is the identity; used on boards whose front
    /// end needs no compensation.
    pub bypass: bool,
}

impl Default for FilterCoefficients {
    fn default() -> Self {
        Self {
            aa: 0,
            bb: 0,
            kk: 0xFF_FFFF,
            pp: 0,
            bypass: true,
        }
    }
}

impl FilterCoefficients {
    /// Coefficient ranges are checked here, at configuration time; the
    /// filter itself has no failure modes while streaming.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bypass {
            return Ok(());
        }
        for (name, value) in [("aa", self.aa), ("bb", self.bb), ("pp", self.pp)] {
            if value >= FILTER_COEFF_Q25 {
                return Err(ConfigError::FilterCoefficient(format!(
                    "{name}={value:#x} exceeds Q25 range"
                )));
            }
        }
        if self.kk == 0 || self.kk > FILTER_COEFF_Q24 {
            return Err(ConfigError::FilterCoefficient(format!(
                "kk={:#x} outside (0, 2^24]",
                self.kk
            )));
        }
        Ok(())
    }
}
