//! Radiometric compensation: raw subpage codes to object temperatures.
//!
//! One call to [`compensate_subpage`] turns the half of the pixel grid a
//! capture carries into absolute temperatures in °C, applying the full
//! correction chain: gain normalization, per-pixel offset with ambient and
//! supply dependence, readout-mode corrections, compensation-pixel
//! cross-talk removal, emissivity division and the two-pass radiometric
//! inversion with per-range sensitivity coefficients.
//!
//! Every step runs on [`UncertainValue`]s, so feeding an uncertain input
//! (quantization-widened ADC codes, an emissivity interval) yields output
//! distributions per pixel. Pixels are independent and are processed in
//! parallel with rayon; per-pixel RNG streams are derived from a single seed
//! so results do not depend on scheduling.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::ambient::{ambient_temperature, reflected_temperature, supply_voltage, VDD_NOMINAL};
use crate::eeprom::CalibrationParams;
use crate::frame::{conversion_pattern, interleave_pattern, subpage_pattern, FrameError, RawFrame};
use crate::uncertain::{UncertainError, UncertainValue};
use crate::{FRAME_HEIGHT, FRAME_WIDTH, PIXEL_COUNT};

/// Normalization constant folded into the stored sensitivity tables.
pub const SCALE_ALPHA: f64 = 1e-6;

/// Ensemble size used when the caller does not pick one.
pub const DEFAULT_ENSEMBLE_SIZE: usize = 4096;

const KELVIN_OFFSET: f64 = 273.15;

/// Splitmix-style stream separation so every pixel gets an independent,
/// reproducible RNG from one seed.
const PIXEL_STREAM_MUL: u64 = 0x9E37_79B9_7F4A_7C15;

/// RNG seed for one pixel's quantization draws. The 1-based multiply keeps
/// every pixel stream, including pixel 0's, distinct from the base seed, so
/// a caller may seed other distributions (e.g. emissivity) from that seed
/// without correlating them with any pixel's noise.
fn pixel_stream(seed: u64, pixel: usize) -> u64 {
    seed ^ (pixel as u64 + 1).wrapping_mul(PIXEL_STREAM_MUL)
}

/// Errors from the compensation pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum CompensationError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Uncertain(#[from] UncertainError),

    /// The per-frame gain word was zero; the frame is unusable.
    #[error("frame gain word is zero")]
    ZeroGainWord,

    /// Emissivity support must be strictly positive.
    #[error("emissivity must be positive, support reaches {0}")]
    NonPositiveEmissivity(f64),

    /// A full-grid operation was asked of a frame with missing pixels.
    #[error("temperature frame is incomplete, {missing} pixels missing")]
    IncompleteFrame { missing: usize },
}

/// How raw ADC codes enter the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationModel {
    /// Codes are taken at face value; the whole pipeline stays scalar and
    /// output pixels are exact.
    Exact,
    /// Each code is widened into a uniform interval of one code width,
    /// sampled into an ensemble. `seed` fixes every pixel's draw.
    Ensemble { samples: usize, seed: u64 },
}

/// Per-pixel object temperatures for one (possibly partial) grid.
///
/// A slot is `None` until some capture has covered that pixel; merging the
/// two subpages of one readout cycle yields a complete frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureFrame {
    pixels: Vec<Option<UncertainValue>>,
}

impl TemperatureFrame {
    /// A frame with every pixel missing.
    pub fn empty() -> Self {
        TemperatureFrame {
            pixels: vec![None; PIXEL_COUNT],
        }
    }

    fn from_pixels(pixels: Vec<Option<UncertainValue>>) -> Self {
        debug_assert_eq!(pixels.len(), PIXEL_COUNT);
        TemperatureFrame { pixels }
    }

    /// Temperature of one pixel, if any capture has covered it.
    pub fn pixel(&self, pixel: usize) -> Option<&UncertainValue> {
        self.pixels[pixel].as_ref()
    }

    /// Number of pixels no capture has covered yet.
    pub fn missing(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_none()).count()
    }

    /// True once every pixel holds a temperature.
    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }

    /// Overlay `other` onto this frame. Pixels present in both keep the
    /// values from `self`.
    pub fn merge(&self, other: &TemperatureFrame) -> TemperatureFrame {
        let pixels = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| a.clone().or_else(|| b.clone()))
            .collect();
        TemperatureFrame::from_pixels(pixels)
    }

    /// Mean temperature per pixel as a 24×32 grid.
    ///
    /// Requires a complete frame; collapses ensembles to their means.
    pub fn mean_grid(&self) -> Result<Array2<f64>, CompensationError> {
        let missing = self.missing();
        if missing > 0 {
            return Err(CompensationError::IncompleteFrame { missing });
        }
        let means: Vec<f64> = self
            .pixels
            .iter()
            .map(|p| p.as_ref().map(UncertainValue::mean).unwrap_or(f64::NAN))
            .collect();
        // Length is PIXEL_COUNT by construction.
        Ok(Array2::from_shape_vec((FRAME_HEIGHT, FRAME_WIDTH), means)
            .unwrap_or_else(|_| Array2::zeros((FRAME_HEIGHT, FRAME_WIDTH))))
    }
}

/// Per-range sensitivity correction factors for the refinement pass.
fn alpha_corrections(params: &CalibrationParams) -> [f64; 4] {
    let corr2 = 1.0 + params.ks_to[1] * params.ct[2];
    [
        1.0 / (1.0 + params.ks_to[0] * 40.0),
        1.0,
        corr2,
        corr2 * (1.0 + params.ks_to[2] * (params.ct[3] - params.ct[2])),
    ]
}

/// Index of the temperature range a coarse estimate falls in: the first
/// range whose upper breakpoint strictly exceeds the estimate, with the top
/// range absorbing everything above the last breakpoint.
fn select_range(to: f64, ct: &[f64; 4]) -> usize {
    if to < ct[1] {
        0
    } else if to < ct[2] {
        1
    } else if to < ct[3] {
        2
    } else {
        3
    }
}

/// Second-pass inversion with the selected range's sensitivity applied.
fn refine(
    to: f64,
    ir: f64,
    ta_tr: f64,
    alpha_comp: f64,
    params: &CalibrationParams,
    corrections: &[f64; 4],
) -> f64 {
    let range = select_range(to, &params.ct);
    let sensitivity =
        alpha_comp * corrections[range] * (1.0 + params.ks_to[range] * (to - params.ct[range]));
    (ir / sensitivity + ta_tr).powf(0.25) - KELVIN_OFFSET
}

/// Compensate the pixels one capture carries into object temperatures.
///
/// `emissivity` is the measurand emissivity, exact or as a distribution;
/// its ensemble (if any) must match the quantization ensemble size so
/// members pair coherently. `tr` overrides the reflected background
/// temperature; when `None` it defaults to the die temperature minus the
/// standard shift.
///
/// Pixels outside the capture's subpage are left `None` in the result.
///
/// # Panics
/// Panics if `emissivity` is an ensemble whose size differs from the
/// quantization ensemble size.
pub fn compensate_subpage(
    frame: &RawFrame,
    params: &CalibrationParams,
    emissivity: &UncertainValue,
    tr: Option<f64>,
    quantization: &QuantizationModel,
) -> Result<TemperatureFrame, CompensationError> {
    if emissivity.min() <= 0.0 {
        return Err(CompensationError::NonPositiveEmissivity(emissivity.min()));
    }
    let gain_code = frame.gain_code();
    if gain_code == 0 {
        return Err(CompensationError::ZeroGainWord);
    }
    let gain = params.gain as f64 / gain_code as f64;

    let vdd = supply_voltage(frame, params);
    let ta = ambient_temperature(frame, params, vdd);
    let tr = tr.unwrap_or_else(|| reflected_temperature(ta));

    let ta4 = (ta + KELVIN_OFFSET).powi(4);
    let tr4 = (tr + KELVIN_OFFSET).powi(4);
    // Effective radiometric background seen through the emissivity.
    let ta_tr = emissivity.map(|e| tr4 - (tr4 - ta4) / e);

    let mode = frame.readout_mode();
    let subpage = frame.subpage();
    let mode_mismatch = mode != params.calibration_mode;

    let kta_scale = 2f64.powi(params.kta_scale as i32);
    let kv_scale = 2f64.powi(params.kv_scale as i32);
    let alpha_scale = 2f64.powi(params.alpha_scale as i32);
    let corrections = alpha_corrections(params);

    // Compensation-pixel signal per subpage. In a mode the part was not
    // calibrated in, subpage 1 picks up the first interleave correction.
    let cp_ambient = (1.0 + params.cp_kta * (ta - 25.0)) * (1.0 + params.cp_kv * (vdd - VDD_NOMINAL));
    let mut ir_cp = [0.0f64; 2];
    for (sp, slot) in ir_cp.iter_mut().enumerate() {
        let mut offset = params.cp_offset[sp] as f64;
        if sp == 1 && mode_mismatch {
            offset += params.il_chess_c[0];
        }
        *slot = frame.compensation_code(sp as u16) as f64 * gain - offset * cp_ambient;
    }

    let pixels: Result<Vec<Option<UncertainValue>>, CompensationError> = (0..PIXEL_COUNT)
        .into_par_iter()
        .map(|p| {
            if subpage_pattern(p, mode) != subpage {
                return Ok(None);
            }

            let code = frame.pixel_code(p) as f64;
            let ir_raw = match *quantization {
                QuantizationModel::Exact => UncertainValue::exact(code),
                QuantizationModel::Ensemble { samples, seed } => {
                    let mut rng = ChaCha8Rng::seed_from_u64(pixel_stream(seed, p));
                    UncertainValue::uniform(code - 0.5, code + 0.5, samples, &mut rng)?
                }
            };

            let kta = params.kta[p] as f64 / kta_scale;
            let kv = params.kv[p] as f64 / kv_scale;
            let offset = params.offset[p] as f64
                * (1.0 + kta * (ta - 25.0))
                * (1.0 + kv * (vdd - VDD_NOMINAL));

            let mut ir = ir_raw * gain - offset;
            if mode_mismatch {
                let il = interleave_pattern(p) as f64;
                ir = ir + params.il_chess_c[2] * (2.0 * il - 1.0)
                    - params.il_chess_c[1] * conversion_pattern(p) as f64;
            }
            ir = ir - params.tgc * ir_cp[subpage as usize];
            let ir = ir / emissivity.clone();

            let alpha_comp =
                SCALE_ALPHA * alpha_scale / params.alpha[p] as f64 * (1.0 + params.ks_ta * (ta - 25.0));

            let ks_to1 = params.ks_to[1];
            let sx = ir.zip_with(&ta_tr, |ir, ta_tr| {
                ks_to1 * (alpha_comp.powi(3) * (ir + alpha_comp * ta_tr)).powf(0.25)
            });
            let coarse = UncertainValue::zip3_with(&ir, &sx, &ta_tr, |ir, sx, ta_tr| {
                (ir / (alpha_comp * (1.0 - ks_to1 * KELVIN_OFFSET) + sx) + ta_tr).powf(0.25)
                    - KELVIN_OFFSET
            });
            let to = UncertainValue::zip3_with(&coarse, &ir, &ta_tr, |to, ir, ta_tr| {
                refine(to, ir, ta_tr, alpha_comp, params, &corrections)
            });
            Ok(Some(to))
        })
        .collect();

    Ok(TemperatureFrame::from_pixels(pixels?))
}
