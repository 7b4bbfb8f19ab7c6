//! Shared types for the streaming server: session configuration, sample
//! frames, calibration data and the control-plane message model.

pub mod board;
pub mod calib;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;

pub use board::BoardModel;
pub use calib::{calib_full_scale_to_voltage, CalibrationParams, FilterCoefficients};
pub use config::{
    Attenuator, ChannelMask, FileFormat, Resolution, SaveMode, StreamConfig, TransportKind,
};
pub use control::{DeviceIdentity, EventKind, NetConfigMessage, StreamSettings};
pub use error::{CodecError, ConfigError};
pub use frame::SampleFrame;
