//! Factory calibration extraction from the sensor's EEPROM image.
//!
//! The sensor ships an 832-word nonvolatile calibration record whose layout
//! is fixed by the vendor memory map. [`EepromImage`] wraps the raw words
//! behind named accessors (one per documented field) so the decoding in
//! [`CalibrationParams::from_eeprom`] reads as the memory map instead of a
//! wall of shifts and masks, and nothing downstream ever touches calibration
//! words directly.
//!
//! Extraction is deterministic and runs once per session. Several tables are
//! re-scaled during extraction: the per-pixel kta/kv/alpha values are
//! normalized onto the largest power of two that still fits the compact
//! integer representation, and the chosen exponent is carried alongside the
//! table so compensation can undo it with a single `2^scale` division.

use log::debug;
use thiserror::Error;

use crate::frame::ReadoutMode;
use crate::{EEPROM_WORDS, PIXEL_COUNT};

/// Errors from decoding a calibration record.
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    /// The supplied buffer was not one whole EEPROM image.
    #[error("calibration record must contain {expected} words, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// The device-select bit marks an incompatible or corrupted part.
    #[error("calibration record is not from a supported device")]
    UnsupportedDevice,

    /// Range breakpoints must be strictly increasing.
    #[error("range breakpoints are not strictly increasing: {ct:?}")]
    NonMonotonicRanges { ct: [f64; 4] },

    /// A sensitivity table decoded to values its rescaling cannot represent
    /// (all zero, non-positive, or non-finite).
    #[error("calibration table '{table}' is degenerate")]
    DegenerateTable { table: &'static str },
}

/// Raw calibration record with named accessors for every documented field.
///
/// Word indices below are offsets into the 832-word image. Multi-bit
/// sub-fields are returned still packed in their two's-complement width;
/// sign extension happens in the extraction code next to the scale that
/// gives the field meaning.
#[derive(Debug, Clone)]
pub struct EepromImage {
    words: Box<[u16; EEPROM_WORDS]>,
}

impl EepromImage {
    /// Validate the buffer length and take ownership of the image.
    pub fn from_words(words: &[u16]) -> Result<Self, CalibrationError> {
        if words.len() != EEPROM_WORDS {
            return Err(CalibrationError::WrongLength {
                expected: EEPROM_WORDS,
                actual: words.len(),
            });
        }
        let mut buf = Box::new([0u16; EEPROM_WORDS]);
        buf.copy_from_slice(words);
        Ok(EepromImage { words: buf })
    }

    /// Device options word; bit 6 set marks an unsupported device.
    fn device_valid(&self) -> bool {
        self.words[10] & 0x0040 == 0
    }

    /// Calibration readout mode: word 10 bit 11 set means the part was
    /// calibrated in interleaved mode.
    fn calibration_mode(&self) -> ReadoutMode {
        if self.words[10] & 0x0800 != 0 {
            ReadoutMode::Interleaved
        } else {
            ReadoutMode::Chess
        }
    }

    // --- supply / ambient constants -------------------------------------

    /// Kv_PTAT, word 50 bits 15..10 (6-bit signed).
    fn kv_ptat_raw(&self) -> u16 {
        (self.words[50] & 0xFC00) >> 10
    }

    /// Kt_PTAT, word 50 bits 9..0 (10-bit signed).
    fn kt_ptat_raw(&self) -> u16 {
        self.words[50] & 0x03FF
    }

    /// PTAT reading at 25 °C, word 49.
    fn v_ptat25(&self) -> u16 {
        self.words[49]
    }

    /// Alpha_PTAT field, word 16 bits 15..12 (kept in place; the documented
    /// formula divides the masked word by 2^14).
    fn alpha_ptat_masked(&self) -> u16 {
        self.words[16] & 0xF000
    }

    /// K_Vdd, word 51 high byte (8-bit signed, LSB = 32 counts).
    fn k_vdd_raw(&self) -> u16 {
        (self.words[51] & 0xFF00) >> 8
    }

    /// Vdd_25 byte, word 51 low byte.
    fn vdd25_raw(&self) -> u16 {
        self.words[51] & 0x00FF
    }

    /// ADC resolution the part was calibrated at, word 56 bits 13..12.
    fn resolution(&self) -> u8 {
        ((self.words[56] & 0x3000) >> 12) as u8
    }

    // --- global radiometric constants -----------------------------------

    /// Gain reference, word 48 (16-bit signed).
    fn gain_raw(&self) -> u16 {
        self.words[48]
    }

    /// KsTa, word 60 high byte (8-bit signed, scaled by 2^13).
    fn ks_ta_raw(&self) -> u16 {
        (self.words[60] & 0xFF00) >> 8
    }

    /// TGC, word 60 low byte (8-bit signed, scaled by 32).
    fn tgc_raw(&self) -> u16 {
        self.words[60] & 0x00FF
    }

    // --- range table ----------------------------------------------------

    /// Breakpoint step multiplier, word 63 bits 13..12 (in units of 10 °C).
    fn ct_step_raw(&self) -> u16 {
        (self.words[63] & 0x3000) >> 12
    }

    /// Second breakpoint field, word 63 bits 7..4.
    fn ct2_raw(&self) -> u16 {
        (self.words[63] & 0x00F0) >> 4
    }

    /// Third breakpoint field, word 63 bits 11..8.
    fn ct3_raw(&self) -> u16 {
        (self.words[63] & 0x0F00) >> 8
    }

    /// KsTo scale exponent offset, word 63 bits 3..0 (exponent is field+8).
    fn ks_to_scale_raw(&self) -> u16 {
        self.words[63] & 0x000F
    }

    /// Per-range KsTo byte: ranges 0/1 in word 61, ranges 2/3 in word 62.
    fn ks_to_raw(&self, range: usize) -> u16 {
        match range {
            0 => self.words[61] & 0x00FF,
            1 => (self.words[61] & 0xFF00) >> 8,
            2 => self.words[62] & 0x00FF,
            _ => (self.words[62] & 0xFF00) >> 8,
        }
    }

    // --- offset table ---------------------------------------------------

    /// Offset remnant scale, word 16 bits 3..0.
    fn occ_rem_scale(&self) -> u32 {
        (self.words[16] & 0x000F) as u32
    }

    /// Offset column scale, word 16 bits 7..4.
    fn occ_column_scale(&self) -> u32 {
        ((self.words[16] & 0x00F0) >> 4) as u32
    }

    /// Offset row scale, word 16 bits 11..8.
    fn occ_row_scale(&self) -> u32 {
        ((self.words[16] & 0x0F00) >> 8) as u32
    }

    /// Average offset reference, word 17 (16-bit signed).
    fn offset_ref(&self) -> i32 {
        self.words[17] as i16 as i32
    }

    /// Row offset accumulator, 24 4-bit signed nibbles packed in words
    /// 18..24.
    fn occ_row(&self, row: usize) -> i32 {
        nibble(self.words[18 + row / 4], row % 4)
    }

    /// Column offset accumulator, 32 4-bit signed nibbles packed in words
    /// 24..32.
    fn occ_column(&self, column: usize) -> i32 {
        nibble(self.words[24 + column / 4], column % 4)
    }

    // --- alpha table ----------------------------------------------------

    /// Alpha remnant scale, word 32 bits 3..0.
    fn acc_rem_scale(&self) -> u32 {
        (self.words[32] & 0x000F) as u32
    }

    /// Alpha column scale, word 32 bits 7..4.
    fn acc_column_scale(&self) -> u32 {
        ((self.words[32] & 0x00F0) >> 4) as u32
    }

    /// Alpha row scale, word 32 bits 11..8.
    fn acc_row_scale(&self) -> u32 {
        ((self.words[32] & 0x0F00) >> 8) as u32
    }

    /// Alpha scale exponent field, word 32 bits 15..12. The pixel table
    /// uses exponent field+30; the compensation-pixel pair uses field+27.
    fn alpha_scale_field(&self) -> u32 {
        ((self.words[32] & 0xF000) >> 12) as u32
    }

    /// Average sensitivity reference, word 33.
    fn alpha_ref(&self) -> i32 {
        self.words[33] as i32
    }

    /// Row sensitivity accumulator, 24 nibbles in words 34..40.
    fn acc_row(&self, row: usize) -> i32 {
        nibble(self.words[34 + row / 4], row % 4)
    }

    /// Column sensitivity accumulator, 32 nibbles in words 40..48.
    fn acc_column(&self, column: usize) -> i32 {
        nibble(self.words[40 + column / 4], column % 4)
    }

    // --- per-pixel word -------------------------------------------------

    /// Packed per-pixel calibration word, 64..832. Bits 15..10 hold the
    /// pixel offset, bits 9..4 the pixel alpha delta, bits 3..1 the pixel
    /// kta delta.
    fn pixel_word(&self, pixel: usize) -> u16 {
        self.words[64 + pixel]
    }

    fn pixel_offset_raw(&self, pixel: usize) -> i32 {
        sign_extend((self.pixel_word(pixel) & 0xFC00) >> 10, 6)
    }

    fn pixel_alpha_raw(&self, pixel: usize) -> i32 {
        sign_extend((self.pixel_word(pixel) & 0x03F0) >> 4, 6)
    }

    fn pixel_kta_raw(&self, pixel: usize) -> i32 {
        sign_extend((self.pixel_word(pixel) & 0x000E) >> 1, 3)
    }

    // --- kta / kv quadrant constants ------------------------------------

    /// Kta quadrant constants indexed by (row parity, column parity):
    /// word 54 holds the even-column pair, word 55 the odd-column pair.
    fn kta_quadrant_raw(&self, split: usize) -> i32 {
        let word = match split {
            0 => (self.words[54] & 0xFF00) >> 8, // odd row, odd column
            1 => (self.words[55] & 0xFF00) >> 8, // even row, odd column
            2 => self.words[54] & 0x00FF,        // odd row, even column
            _ => self.words[55] & 0x00FF,        // even row, even column
        };
        sign_extend(word, 8)
    }

    /// Kv quadrant constants packed as four nibbles of word 52.
    fn kv_quadrant_raw(&self, split: usize) -> i32 {
        let word = match split {
            0 => (self.words[52] & 0xF000) >> 12,
            1 => (self.words[52] & 0x00F0) >> 4,
            2 => (self.words[52] & 0x0F00) >> 8,
            _ => self.words[52] & 0x000F,
        };
        sign_extend(word, 4)
    }

    /// Kta scale exponent, word 56 bits 7..4 (exponent is field+8).
    fn kta_scale1_raw(&self) -> u32 {
        (((self.words[56] & 0x00F0) >> 4) + 8) as u32
    }

    /// Kta remnant scale exponent, word 56 bits 3..0.
    fn kta_scale2_raw(&self) -> u32 {
        (self.words[56] & 0x000F) as u32
    }

    /// Kv scale exponent, word 56 bits 11..8.
    fn kv_scale_raw(&self) -> u32 {
        ((self.words[56] & 0x0F00) >> 8) as u32
    }

    // --- compensation pixels and interleave corrections -----------------

    /// Compensation-pixel sensitivity for subpage 0, word 57 bits 9..0
    /// (10-bit signed).
    fn cp_alpha0_raw(&self) -> i32 {
        sign_extend(self.words[57] & 0x03FF, 10)
    }

    /// Subpage-1 sensitivity delta, word 57 bits 15..10 (6-bit signed,
    /// LSB = 1/128 relative).
    fn cp_alpha1_delta_raw(&self) -> i32 {
        sign_extend((self.words[57] & 0xFC00) >> 10, 6)
    }

    /// Compensation-pixel offset for subpage 0, word 58 bits 9..0.
    fn cp_offset0_raw(&self) -> i32 {
        sign_extend(self.words[58] & 0x03FF, 10)
    }

    /// Subpage-1 offset delta, word 58 bits 15..10.
    fn cp_offset1_delta_raw(&self) -> i32 {
        sign_extend((self.words[58] & 0xFC00) >> 10, 6)
    }

    /// Compensation-pixel Kta, word 59 low byte (8-bit signed).
    fn cp_kta_raw(&self) -> i32 {
        sign_extend(self.words[59] & 0x00FF, 8)
    }

    /// Compensation-pixel Kv, word 59 high byte (8-bit signed).
    fn cp_kv_raw(&self) -> i32 {
        sign_extend((self.words[59] & 0xFF00) >> 8, 8)
    }

    /// Interleave/chess correction constants, three signed fields of word
    /// 53: bits 5..0 (LSB 1/16), bits 10..6 (LSB 1/2), bits 15..11
    /// (LSB 1/8).
    fn il_chess_raw(&self, index: usize) -> i32 {
        match index {
            0 => sign_extend(self.words[53] & 0x003F, 6),
            1 => sign_extend((self.words[53] & 0x07C0) >> 6, 5),
            _ => sign_extend((self.words[53] & 0xF800) >> 11, 5),
        }
    }
}

/// Sign-extend the low `bits` bits of `value`.
fn sign_extend(value: u16, bits: u32) -> i32 {
    let value = value as i32;
    let half = 1 << (bits - 1);
    if value >= half {
        value - (1 << bits)
    } else {
        value
    }
}

/// Signed nibble `index` (0 = least significant) of `word`.
fn nibble(word: u16, index: usize) -> i32 {
    sign_extend((word >> (4 * index)) & 0x000F, 4)
}

/// Quadrant index of a pixel for the kta/kv constants: row parity doubled
/// plus column parity.
fn quadrant(pixel: usize) -> usize {
    2 * ((pixel / 32) % 2) + pixel % 2
}

/// Structured calibration parameters, immutable after extraction.
///
/// Per-pixel tables hold exactly 768 entries indexed like the raw frame's
/// pixel words; `ct` is strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParams {
    /// Supply-voltage slope, counts per volt.
    pub k_vdd: i32,
    /// Supply monitor code at 3.3 V.
    pub vdd25: i32,
    /// PTAT supply sensitivity.
    pub kv_ptat: f64,
    /// PTAT temperature slope.
    pub kt_ptat: f64,
    /// PTAT reading at 25 °C.
    pub v_ptat25: u16,
    /// PTAT ratio constant.
    pub alpha_ptat: f64,
    /// Gain reference the per-frame gain word is normalized against.
    pub gain: i32,
    /// Cross-talk gain compensation factor.
    pub tgc: f64,
    /// Ambient sensitivity coefficient.
    pub ks_ta: f64,
    /// ADC resolution the calibration was taken at.
    pub resolution: u8,
    /// Readout mode the part was calibrated in.
    pub calibration_mode: ReadoutMode,
    /// Per-range sensitivity coefficients.
    pub ks_to: [f64; 4],
    /// Range breakpoints in °C; strictly increasing.
    pub ct: [f64; 4],
    /// Per-pixel inverted sensitivities, scaled by `2^alpha_scale`.
    pub alpha: Vec<u16>,
    /// Power-of-two exponent of the alpha table.
    pub alpha_scale: u8,
    /// Per-pixel offsets.
    pub offset: Vec<i16>,
    /// Per-pixel ambient coefficients, scaled by `2^kta_scale`.
    pub kta: Vec<i8>,
    /// Power-of-two exponent of the kta table.
    pub kta_scale: u8,
    /// Per-pixel supply coefficients, scaled by `2^kv_scale`.
    pub kv: Vec<i8>,
    /// Power-of-two exponent of the kv table.
    pub kv_scale: u8,
    /// Compensation-pixel sensitivities per subpage.
    pub cp_alpha: [f64; 2],
    /// Compensation-pixel offsets per subpage.
    pub cp_offset: [i16; 2],
    /// Compensation-pixel ambient coefficient.
    pub cp_kta: f64,
    /// Compensation-pixel supply coefficient.
    pub cp_kv: f64,
    /// Interleave/chess correction terms.
    pub il_chess_c: [f64; 3],
}

impl CalibrationParams {
    /// Decode the full parameter set from a calibration image.
    ///
    /// Deterministic; no side effects beyond the returned set. Structurally
    /// invalid records (wrong device, non-monotonic range table, degenerate
    /// sensitivity tables) are rejected rather than silently producing
    /// nonsensical parameters.
    pub fn from_eeprom(eeprom: &EepromImage) -> Result<Self, CalibrationError> {
        if !eeprom.device_valid() {
            return Err(CalibrationError::UnsupportedDevice);
        }

        // Supply and ambient constants.
        let k_vdd = sign_extend(eeprom.k_vdd_raw(), 8) * 32;
        let vdd25 = ((eeprom.vdd25_raw() as i32 - 256) << 5) - 8192;
        let kv_ptat = sign_extend(eeprom.kv_ptat_raw(), 6) as f64 / 4096.0;
        let kt_ptat = sign_extend(eeprom.kt_ptat_raw(), 10) as f64 / 8.0;
        let alpha_ptat = eeprom.alpha_ptat_masked() as f64 / 16384.0 + 8.0;

        // Global radiometric constants.
        let gain = eeprom.gain_raw() as i16 as i32;
        let tgc = sign_extend(eeprom.tgc_raw(), 8) as f64 / 32.0;
        let ks_ta = sign_extend(eeprom.ks_ta_raw(), 8) as f64 / 8192.0;

        // Range table.
        let step = (eeprom.ct_step_raw() * 10) as f64;
        let ct2 = eeprom.ct2_raw() as f64 * step;
        let ct3 = ct2 + eeprom.ct3_raw() as f64 * step;
        let ct = [-40.0, 0.0, ct2, ct3];
        if !(ct[0] < ct[1] && ct[1] < ct[2] && ct[2] < ct[3]) {
            return Err(CalibrationError::NonMonotonicRanges { ct });
        }
        let ks_to_scale = (1u32 << (eeprom.ks_to_scale_raw() + 8)) as f64;
        let mut ks_to = [0.0; 4];
        for (range, slot) in ks_to.iter_mut().enumerate() {
            *slot = sign_extend(eeprom.ks_to_raw(range), 8) as f64 / ks_to_scale;
        }

        // Compensation pixels. The pair shares the pixel alpha exponent
        // field but with a +27 bias instead of +30.
        let cp_alpha_scale = 2f64.powi(eeprom.alpha_scale_field() as i32 + 27);
        let cp_alpha0 = eeprom.cp_alpha0_raw() as f64 / cp_alpha_scale;
        let cp_alpha1 = (1.0 + eeprom.cp_alpha1_delta_raw() as f64 / 128.0) * cp_alpha0;
        let cp_offset0 = eeprom.cp_offset0_raw();
        let cp_offset1 = cp_offset0 + eeprom.cp_offset1_delta_raw();
        let cp_kta = eeprom.cp_kta_raw() as f64 / 2f64.powi(eeprom.kta_scale1_raw() as i32);
        let cp_kv = eeprom.cp_kv_raw() as f64 / 2f64.powi(eeprom.kv_scale_raw() as i32);

        // Per-pixel offset table: pixel remnant plus row/column
        // accumulators plus the average reference.
        let occ_rem = 1i32 << eeprom.occ_rem_scale();
        let offset: Vec<i16> = (0..PIXEL_COUNT)
            .map(|p| {
                let value = eeprom.pixel_offset_raw(p) * occ_rem
                    + eeprom.offset_ref()
                    + (eeprom.occ_row(p / 32) << eeprom.occ_row_scale())
                    + (eeprom.occ_column(p % 32) << eeprom.occ_column_scale());
                value as i16
            })
            .collect();

        // Per-pixel sensitivity table, inverted and renormalized onto the
        // largest power of two fitting u16.
        let acc_rem = 1i32 << eeprom.acc_rem_scale();
        let alpha_div = 2f64.powi(eeprom.alpha_scale_field() as i32 + 30);
        let cp_alpha_mean = tgc * (cp_alpha0 + cp_alpha1) / 2.0;
        let alpha_f: Vec<f64> = (0..PIXEL_COUNT)
            .map(|p| {
                let acc = eeprom.alpha_ref()
                    + (eeprom.acc_row(p / 32) << eeprom.acc_row_scale())
                    + (eeprom.acc_column(p % 32) << eeprom.acc_column_scale())
                    + eeprom.pixel_alpha_raw(p) * acc_rem;
                crate::compensation::SCALE_ALPHA / (acc as f64 / alpha_div - cp_alpha_mean)
            })
            .collect();
        let (alpha, alpha_scale) = rescale_u16(&alpha_f, "alpha")?;

        // Per-pixel ambient coefficients.
        let kta_div = 2f64.powi(eeprom.kta_scale1_raw() as i32);
        let kta_rem = 1i32 << eeprom.kta_scale2_raw();
        let kta_f: Vec<f64> = (0..PIXEL_COUNT)
            .map(|p| {
                let raw = eeprom.pixel_kta_raw(p) * kta_rem + eeprom.kta_quadrant_raw(quadrant(p));
                raw as f64 / kta_div
            })
            .collect();
        let (kta, kta_scale) = rescale_i8(&kta_f, "kta")?;

        // Per-pixel supply coefficients.
        let kv_div = 2f64.powi(eeprom.kv_scale_raw() as i32);
        let kv_f: Vec<f64> = (0..PIXEL_COUNT)
            .map(|p| eeprom.kv_quadrant_raw(quadrant(p)) as f64 / kv_div)
            .collect();
        let (kv, kv_scale) = rescale_i8(&kv_f, "kv")?;

        debug!(
            "extracted calibration: alpha_scale=2^{} kta_scale=2^{} kv_scale=2^{} ct={:?}",
            alpha_scale, kta_scale, kv_scale, ct
        );

        Ok(CalibrationParams {
            k_vdd,
            vdd25,
            kv_ptat,
            kt_ptat,
            v_ptat25: eeprom.v_ptat25(),
            alpha_ptat,
            gain,
            tgc,
            ks_ta,
            resolution: eeprom.resolution(),
            calibration_mode: eeprom.calibration_mode(),
            ks_to,
            ct,
            alpha,
            alpha_scale,
            offset,
            kta,
            kta_scale,
            kv,
            kv_scale,
            cp_alpha: [cp_alpha0, cp_alpha1],
            cp_offset: [cp_offset0 as i16, cp_offset1 as i16],
            cp_kta,
            cp_kv,
            il_chess_c: [
                eeprom.il_chess_raw(0) as f64 / 16.0,
                eeprom.il_chess_raw(1) as f64 / 2.0,
                eeprom.il_chess_raw(2) as f64 / 8.0,
            ],
        })
    }
}

/// Largest power-of-two exponent that brings the table maximum into the
/// upper half of the target integer range.
fn rescale_exponent(
    max_magnitude: f64,
    threshold: f64,
    table: &'static str,
) -> Result<u8, CalibrationError> {
    if !max_magnitude.is_finite() || max_magnitude <= 0.0 {
        return Err(CalibrationError::DegenerateTable { table });
    }
    let mut magnitude = max_magnitude;
    let mut scale = 0u8;
    while magnitude < threshold {
        if scale == u8::MAX {
            return Err(CalibrationError::DegenerateTable { table });
        }
        magnitude *= 2.0;
        scale += 1;
    }
    Ok(scale)
}

/// Renormalize a positive table into u16 with a power-of-two exponent.
fn rescale_u16(values: &[f64], table: &'static str) -> Result<(Vec<u16>, u8), CalibrationError> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(CalibrationError::DegenerateTable { table });
    }
    let scale = rescale_exponent(max, 32767.4, table)?;
    let factor = 2f64.powi(scale as i32);
    let out = values.iter().map(|v| (v * factor + 0.5) as u16).collect();
    Ok((out, scale))
}

/// Renormalize a signed table into i8 with a power-of-two exponent,
/// rounding away from zero like the reference implementation.
fn rescale_i8(values: &[f64], table: &'static str) -> Result<(Vec<i8>, u8), CalibrationError> {
    let max = values.iter().map(|v| v.abs()).fold(0.0, f64::max);
    let scale = rescale_exponent(max, 63.4, table)?;
    let factor = 2f64.powi(scale as i32);
    let out = values
        .iter()
        .map(|v| {
            let scaled = v * factor;
            if scaled < 0.0 {
                (scaled - 0.5) as i8
            } else {
                (scaled + 0.5) as i8
            }
        })
        .collect();
    Ok((out, scale))
}
