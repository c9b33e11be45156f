//! Ambient conditions derived from a frame's housekeeping words.
//!
//! Supply voltage and die temperature feed every per-pixel correction, so
//! both are computed once per frame from the monitor codes and the
//! calibration constants. All functions here are pure.

use crate::eeprom::CalibrationParams;
use crate::frame::RawFrame;

/// Nominal supply voltage the calibration constants are referenced to.
pub const VDD_NOMINAL: f64 = 3.3;

/// Default offset between die temperature and the reflected background
/// temperature, in °C. The housing of a typical deployment sits this much
/// below the die.
pub const TA_SHIFT: f64 = 8.0;

/// Supply voltage in volts from the frame's monitor code.
///
/// The monitor code depends on the ADC resolution the control register was
/// set to at capture time, so it is first normalized back onto the
/// resolution the part was calibrated at.
pub fn supply_voltage(frame: &RawFrame, params: &CalibrationParams) -> f64 {
    let correction =
        2f64.powi(params.resolution as i32) / 2f64.powi(frame.adc_resolution() as i32);
    (correction * frame.supply_code() as f64 - params.vdd25 as f64) / params.k_vdd as f64
        + VDD_NOMINAL
}

/// Die (ambient) temperature in °C.
///
/// Uses the ratio of the PTAT reading to an artificial reference built from
/// both PTAT words, which cancels the first-order supply dependence; the
/// residual dependence is removed with `kv_ptat` and the already computed
/// supply voltage.
pub fn ambient_temperature(frame: &RawFrame, params: &CalibrationParams, vdd: f64) -> f64 {
    let ptat = frame.ptat_code() as f64;
    let ptat_art = ptat / (ptat * params.alpha_ptat + frame.ptat_art_code() as f64) * 262144.0;
    (ptat_art / (1.0 + params.kv_ptat * (vdd - VDD_NOMINAL)) - params.v_ptat25 as f64)
        / params.kt_ptat
        + 25.0
}

/// Reflected background temperature estimated from the die temperature.
pub fn reflected_temperature(ta: f64) -> f64 {
    ta - TA_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eeprom::{CalibrationParams, EepromImage};
    use crate::FRAME_WORDS;
    use approx::assert_relative_eq;

    fn fixture_params() -> CalibrationParams {
        let mut ee = vec![0u16; crate::EEPROM_WORDS];
        ee[10] = 0x0000;
        ee[16] = 0x4000;
        ee[32] = 0x6000;
        ee[33] = 640;
        ee[48] = 6383;
        ee[49] = 16384;
        ee[50] = 336;
        ee[51] = 0x9D68;
        ee[52] = 0x2222;
        ee[53] = 0x2088;
        ee[54] = 0x0202;
        ee[55] = 0x0202;
        ee[56] = 0x2000;
        ee[57] = 340;
        ee[58] = 0x03B5;
        ee[60] = 0xF300;
        ee[61] = 0xFEFE;
        ee[62] = 0xFEFE;
        ee[63] = 0x1863;
        let image = EepromImage::from_words(&ee).unwrap();
        CalibrationParams::from_eeprom(&image).unwrap()
    }

    fn fixture_frame(supply: u16, ptat: u16, ptat_art: u16, control: u16) -> RawFrame {
        let mut words = vec![0u16; FRAME_WORDS];
        words[810] = supply;
        words[800] = ptat;
        words[768] = ptat_art;
        words[832] = control;
        words[833] = 0;
        RawFrame::from_words(&words).unwrap()
    }

    #[test]
    fn test_supply_voltage_at_reference_code() {
        let params = fixture_params();
        // Monitor code equal to vdd25 at matching resolution reads exactly
        // the nominal supply.
        let frame = fixture_frame(0xCD00, 1024, 7168, 0x1800);
        assert_relative_eq!(supply_voltage(&frame, &params), 3.3);
    }

    #[test]
    fn test_supply_voltage_resolution_correction() {
        let params = fixture_params();
        // Capture at resolution 1 doubles the effective code before the
        // calibration constants apply.
        let frame = fixture_frame(0xE680, 1024, 7168, 0x1400);
        // -6528 * 2 = -13056, landing back on the reference.
        assert_relative_eq!(supply_voltage(&frame, &params), 3.3);
    }

    #[test]
    fn test_supply_voltage_slope() {
        let params = fixture_params();
        // k_vdd is negative, so one |k_vdd| step above the reference code
        // reads one volt less.
        let code = (-13056i32 + 3168) as i16 as u16;
        let frame = fixture_frame(code, 1024, 7168, 0x1800);
        assert_relative_eq!(supply_voltage(&frame, &params), 2.3, epsilon = 1e-12);

        // And one step below it reads one volt more.
        let code = (-13056i32 - 3168) as i16 as u16;
        let frame = fixture_frame(code, 1024, 7168, 0x1800);
        assert_relative_eq!(supply_voltage(&frame, &params), 4.3, epsilon = 1e-12);
    }

    #[test]
    fn test_ambient_temperature_at_reference() {
        let params = fixture_params();
        // ptat_art resolves to exactly v_ptat25, so the die reads 25 °C.
        let frame = fixture_frame(0xCD00, 1024, 7168, 0x1800);
        let vdd = supply_voltage(&frame, &params);
        assert_relative_eq!(ambient_temperature(&frame, &params, vdd), 25.0);
    }

    #[test]
    fn test_ambient_temperature_slope() {
        let params = fixture_params();
        let frame = fixture_frame(0xCD00, 1024, 7168, 0x1800);
        let vdd = supply_voltage(&frame, &params);
        let ta = ambient_temperature(&frame, &params, vdd);

        // A hotter die raises the PTAT ratio and the reported temperature.
        let hotter = fixture_frame(0xCD00, 1100, 7168, 0x1800);
        let ta_hot = ambient_temperature(&hotter, &params, vdd);
        assert!(ta_hot > ta);
    }

    #[test]
    fn test_reflected_temperature_shift() {
        assert_relative_eq!(reflected_temperature(25.0), 17.0);
        assert_relative_eq!(reflected_temperature(-5.0), -13.0);
    }
}
