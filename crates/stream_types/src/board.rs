//! Board variants and their capabilities.
//!
//! The original firmware selects the board at compile time; here the model
//! is a runtime value carried in the discovery beacon and queried for
//! capabilities once at startup.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Digitizer board model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardModel {
    /// 125 MS/s, 14-bit front end.
    #[serde(rename = "RP_125_14")]
    Rp125_14,
    /// 122.88 MS/s, 16-bit front end.
    #[serde(rename = "RP_122_16")]
    Rp122_16,
    /// 125 MS/s, 14-bit front end on the larger FPGA.
    #[serde(rename = "RP_125_14_Z20")]
    Rp125_14Z20,
    /// 250 MS/s, 12-bit front end with programmable attenuator.
    #[serde(rename = "RP_250_12")]
    Rp250_12,
}

impl BoardModel {
    /// Number of acquisition channels the board exposes.
    pub fn channel_count(self) -> u8 {
        2
    }

    /// ADC resolution of the front end in bits.
    pub fn adc_bits(self) -> u8 {
        match self {
            BoardModel::Rp125_14 | BoardModel::Rp125_14Z20 => 14,
            BoardModel::Rp122_16 => 16,
            BoardModel::Rp250_12 => 12,
        }
    }

    /// Base sample rate of the ADC in Hz, before decimation.
    pub fn base_rate_hz(self) -> u32 {
        match self {
            BoardModel::Rp125_14 | BoardModel::Rp125_14Z20 => 125_000_000,
            BoardModel::Rp122_16 => 122_880_000,
            BoardModel::Rp250_12 => 250_000_000,
        }
    }

    /// Whether the board carries a programmable input attenuator.
    pub fn has_attenuator(self) -> bool {
        matches!(self, BoardModel::Rp250_12)
    }

    /// Whether the analog front end needs the 2-pole equalization filter.
    /// Boards without it run with the filter bypassed.
    pub fn needs_equalization(self) -> bool {
        matches!(self, BoardModel::Rp125_14 | BoardModel::Rp125_14Z20)
    }

    /// Stable name used on the beacon wire.
    pub fn as_str(self) -> &'static str {
        match self {
            BoardModel::Rp125_14 => "RP_125_14",
            BoardModel::Rp122_16 => "RP_122_16",
            BoardModel::Rp125_14Z20 => "RP_125_14_Z20",
            BoardModel::Rp250_12 => "RP_250_12",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CodecError> {
        match s {
            "RP_125_14" => Ok(BoardModel::Rp125_14),
            "RP_122_16" => Ok(BoardModel::Rp122_16),
            "RP_125_14_Z20" => Ok(BoardModel::Rp125_14Z20),
            "RP_250_12" => Ok(BoardModel::Rp250_12),
            other => Err(CodecError::Malformed(format!("unknown board model: {other}"))),
        }
    }
}
