//! Calibration extraction and uncertainty-aware temperature compensation
//! for a 32×24 thermopile sensor array.
//!
//! The crate models the sensor's full readout pipeline:
//!
//! 1. [`eeprom`]: decode the factory calibration record into structured
//!    parameters, once per session.
//! 2. [`frame`]: validate raw subpage captures and expose their
//!    housekeeping words and readout patterns.
//! 3. [`ambient`]: derive supply voltage and die temperature per frame.
//! 4. [`compensation`]: invert the radiometric chain pixel by pixel into
//!    object temperatures.
//! 5. [`uncertain`]: the scalar-or-ensemble value type every stage computes
//!    with, so measurement uncertainty propagates to the output.
//!
//! With exact inputs the pipeline is fully deterministic; with uncertain
//! inputs it is deterministic given a seed.

pub mod ambient;
pub mod compensation;
pub mod eeprom;
pub mod frame;
pub mod uncertain;

/// Pixel columns per row.
pub const FRAME_WIDTH: usize = 32;
/// Pixel rows.
pub const FRAME_HEIGHT: usize = 24;
/// Pixels per full image.
pub const PIXEL_COUNT: usize = FRAME_WIDTH * FRAME_HEIGHT;
/// Words in one calibration record.
pub const EEPROM_WORDS: usize = 832;
/// Words in one raw subpage capture.
pub const FRAME_WORDS: usize = 834;

pub use compensation::{
    compensate_subpage, CompensationError, QuantizationModel, TemperatureFrame,
    DEFAULT_ENSEMBLE_SIZE,
};
pub use eeprom::{CalibrationError, CalibrationParams, EepromImage};
pub use frame::{FrameError, RawFrame, ReadoutMode};
pub use uncertain::{UncertainError, UncertainValue};
