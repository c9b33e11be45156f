//! Raw frame model for the 32×24 sensor array.
//!
//! One capture delivers 834 unsigned 16-bit words: 768 pixel ADC codes
//! followed by housekeeping words at fixed offsets (PTAT and supply readings,
//! compensation-pixel codes, the control register snapshot and the subpage
//! index). A single capture only carries half the pixel grid; which half is
//! determined by the readout pattern (interleaved rows or a chessboard) and
//! the subpage word. Two consecutive captures are needed for a full image.

use thiserror::Error;

use crate::{FRAME_WORDS, PIXEL_COUNT};

/// Errors from building a [`RawFrame`].
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The supplied buffer did not contain exactly one frame.
    #[error("raw frame must contain {expected} words, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// The subpage word must be 0 or 1.
    #[error("subpage word must be 0 or 1, got {0}")]
    InvalidSubpage(u16),
}

/// Pixel readout pattern the sensor was operating in.
///
/// The pattern decides which half of the grid a subpage carries and whether
/// the interleaved-correction terms apply during compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutMode {
    /// Alternating rows per subpage.
    Interleaved,
    /// Chessboard pixel pattern per subpage.
    Chess,
}

// Housekeeping word offsets within a frame.
const PTAT_ART_WORD: usize = 768;
const CP_SUBPAGE0_WORD: usize = 776;
const GAIN_WORD: usize = 778;
const PTAT_WORD: usize = 800;
const CP_SUBPAGE1_WORD: usize = 808;
const VDD_WORD: usize = 810;
const CONTROL_WORD: usize = 832;
const SUBPAGE_WORD: usize = 833;

/// Control-register bit selecting chess readout.
const MEAS_MODE_CHESS_BIT: u16 = 0x1000;
/// Control-register field holding the ADC resolution setting.
const ADC_RESOLUTION_MASK: u16 = 0x0C00;
const ADC_RESOLUTION_SHIFT: u16 = 10;

/// One validated raw subpage capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    words: Box<[u16; FRAME_WORDS]>,
}

impl RawFrame {
    /// Validate and take ownership of one frame's words.
    pub fn from_words(words: &[u16]) -> Result<Self, FrameError> {
        if words.len() != FRAME_WORDS {
            return Err(FrameError::WrongLength {
                expected: FRAME_WORDS,
                actual: words.len(),
            });
        }
        let subpage = words[SUBPAGE_WORD];
        if subpage > 1 {
            return Err(FrameError::InvalidSubpage(subpage));
        }
        let mut buf = Box::new([0u16; FRAME_WORDS]);
        buf.copy_from_slice(words);
        Ok(RawFrame { words: buf })
    }

    /// Raw ADC code of a pixel, reinterpreted as two's-complement.
    ///
    /// # Panics
    /// Panics if `pixel >= 768`.
    pub fn pixel_code(&self, pixel: usize) -> i16 {
        assert!(pixel < PIXEL_COUNT, "pixel index {} out of range", pixel);
        self.words[pixel] as i16
    }

    /// Per-frame gain reference code.
    pub fn gain_code(&self) -> i16 {
        self.words[GAIN_WORD] as i16
    }

    /// Compensation-pixel code for the given subpage (0 or 1).
    pub fn compensation_code(&self, subpage: u16) -> i16 {
        match subpage {
            0 => self.words[CP_SUBPAGE0_WORD] as i16,
            _ => self.words[CP_SUBPAGE1_WORD] as i16,
        }
    }

    /// Supply-voltage monitor code.
    pub fn supply_code(&self) -> i16 {
        self.words[VDD_WORD] as i16
    }

    /// Ambient (PTAT) sensor code.
    pub fn ptat_code(&self) -> i16 {
        self.words[PTAT_WORD] as i16
    }

    /// Artificial PTAT reference code.
    pub fn ptat_art_code(&self) -> i16 {
        self.words[PTAT_ART_WORD] as i16
    }

    /// ADC resolution setting captured in the control word.
    pub fn adc_resolution(&self) -> u16 {
        (self.words[CONTROL_WORD] & ADC_RESOLUTION_MASK) >> ADC_RESOLUTION_SHIFT
    }

    /// Readout pattern the frame was captured in.
    pub fn readout_mode(&self) -> ReadoutMode {
        if self.words[CONTROL_WORD] & MEAS_MODE_CHESS_BIT != 0 {
            ReadoutMode::Chess
        } else {
            ReadoutMode::Interleaved
        }
    }

    /// Which subpage (0 or 1) this capture carries.
    pub fn subpage(&self) -> u16 {
        self.words[SUBPAGE_WORD]
    }
}

/// Interleaved-readout subpage membership of a pixel (its row parity).
pub fn interleave_pattern(pixel: usize) -> u16 {
    ((pixel / 32) % 2) as u16
}

/// Chess-readout subpage membership of a pixel (row parity XOR column
/// parity).
pub fn chess_pattern(pixel: usize) -> u16 {
    interleave_pattern(pixel) ^ (pixel % 2) as u16
}

/// Subpage membership of a pixel under the given readout mode.
pub fn subpage_pattern(pixel: usize, mode: ReadoutMode) -> u16 {
    match mode {
        ReadoutMode::Interleaved => interleave_pattern(pixel),
        ReadoutMode::Chess => chess_pattern(pixel),
    }
}

/// Sign-alternating correction factor used by the interleaved-mode
/// compensation terms. The integer divisions are intentional; the factor
/// cycles with the pixel's position inside each 4-column group and flips
/// with row parity.
pub fn conversion_pattern(pixel: usize) -> i32 {
    let p = pixel as i32;
    ((p + 2) / 4 - (p + 3) / 4 + (p + 1) / 4 - p / 4)
        * (1 - 2 * interleave_pattern(pixel) as i32)
}
