//! Acquisition adapter over the hardware driver, the synthetic driver used
//! for tests and mock runs, and the pure calibration/filter stage.

pub mod driver;
pub mod dsp;
pub mod sine;

pub use driver::{AdcDriver, DriverError, RawBlock};
pub use sine::{sine_sample, SineDriver};
