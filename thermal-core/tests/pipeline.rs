//! End-to-end pipeline tests: calibration record in, temperature grid out.

use approx::assert_relative_eq;
use thermal_core::{
    compensate_subpage, CalibrationParams, EepromImage, QuantizationModel, RawFrame,
    UncertainValue, EEPROM_WORDS, FRAME_HEIGHT, FRAME_WIDTH, FRAME_WORDS, PIXEL_COUNT,
};

/// Calibration image of a fictitious but structurally faithful part. Field
/// values are exact binary fractions so derived parameters can be asserted
/// precisely.
fn calibration_words() -> Vec<u16> {
    let mut ee = vec![0u16; EEPROM_WORDS];
    ee[10] = 0x0000; // supported device, chess calibration
    ee[16] = 0x4000; // alpha_ptat = 9
    ee[32] = 0x6000; // alpha exponent field 6
    ee[33] = 640; // alpha reference
    ee[48] = 6383; // gain reference
    ee[49] = 16384; // v_ptat25
    ee[50] = 336; // kt_ptat = 42
    ee[51] = 0x9D68; // k_vdd = -3168, vdd25 = -13056
    ee[52] = 0x2222; // kv quadrants
    ee[53] = 0x2088; // interleave corrections
    ee[54] = 0x0202; // kta quadrants
    ee[55] = 0x0202;
    ee[56] = 0x2000; // calibrated at resolution 2
    ee[57] = 340; // cp alpha
    ee[58] = 0x03B5; // cp offsets -75/-75
    ee[60] = 0xF300; // ks_ta, tgc = 0
    ee[61] = 0xFEFE; // ks_to
    ee[62] = 0xFEFE;
    ee[63] = 0x1863; // ct = [-40, 0, 60, 140]
    ee
}

/// A chess-mode capture at 25 °C die temperature and nominal supply, with
/// every pixel reading the same code.
fn capture(subpage: u16, pixel_code: u16) -> RawFrame {
    let mut words = vec![pixel_code; FRAME_WORDS];
    words[768] = 7168;
    words[776] = 0xFFBA;
    words[778] = 6383;
    words[800] = 1024;
    words[808] = 0xFFBA;
    words[810] = 0xCD00;
    words[832] = 0x1800;
    words[833] = subpage;
    RawFrame::from_words(&words).unwrap()
}

fn params() -> CalibrationParams {
    let image = EepromImage::from_words(&calibration_words()).unwrap();
    CalibrationParams::from_eeprom(&image).unwrap()
}

/// Straight-line re-derivation of one pixel's temperature from the
/// extracted parameters, with no uncertainty and no range re-selection
/// subtleties hidden behind the library's internal helpers.
fn expected_temperature(params: &CalibrationParams, code: i16, emissivity: f64) -> f64 {
    let ta = 25.0;
    let tr = 17.0;
    let vdd = 3.3;
    let gain = 1.0; // frame gain word equals the calibration reference

    let ta4 = (ta + 273.15f64).powi(4);
    let tr4 = (tr + 273.15f64).powi(4);
    let ta_tr = tr4 - (tr4 - ta4) / emissivity;

    let kta = params.kta[0] as f64 / 2f64.powi(params.kta_scale as i32);
    let kv = params.kv[0] as f64 / 2f64.powi(params.kv_scale as i32);
    let mut ir = code as f64 * gain;
    ir -= params.offset[0] as f64 * (1.0 + kta * (ta - 25.0)) * (1.0 + kv * (vdd - 3.3));
    ir /= emissivity;

    let alpha = 1e-6 * 2f64.powi(params.alpha_scale as i32) / params.alpha[0] as f64
        * (1.0 + params.ks_ta * (ta - 25.0));

    let ks_to1 = params.ks_to[1];
    let sx = ks_to1 * (alpha.powi(3) * (ir + alpha * ta_tr)).powf(0.25);
    let coarse = (ir / (alpha * (1.0 - ks_to1 * 273.15) + sx) + ta_tr).powf(0.25) - 273.15;

    let range = if coarse < params.ct[1] {
        0
    } else if coarse < params.ct[2] {
        1
    } else if coarse < params.ct[3] {
        2
    } else {
        3
    };
    let corr2 = 1.0 + ks_to1 * params.ct[2];
    let corrections = [
        1.0 / (1.0 + params.ks_to[0] * 40.0),
        1.0,
        corr2,
        corr2 * (1.0 + params.ks_to[2] * (params.ct[3] - params.ct[2])),
    ];
    let sens = alpha * corrections[range] * (1.0 + params.ks_to[range] * (coarse - params.ct[range]));
    (ir / sens + ta_tr).powf(0.25) - 273.15
}

#[test]
fn exact_pipeline_matches_direct_computation() {
    let params = params();
    let emissivity = UncertainValue::exact(0.95);

    let sp0 = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    let sp1 = compensate_subpage(
        &capture(1, 0xFFF8),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    let merged = sp0.merge(&sp1);
    assert!(merged.is_complete());

    let expected = expected_temperature(&params, -8, 0.95);
    for pixel in 0..PIXEL_COUNT {
        let to = merged.pixel(pixel).unwrap();
        assert!(to.is_exact());
        assert_relative_eq!(to.mean(), expected, epsilon = 1e-9);
    }
    // Sanity: the result is physically plausible for a near-ambient scene.
    assert!(expected > 5.0 && expected < 30.0, "to = {}", expected);
}

#[test]
fn grid_has_sensor_geometry() {
    let params = params();
    let emissivity = UncertainValue::exact(0.95);
    let merged = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Exact,
    )
    .unwrap()
    .merge(
        &compensate_subpage(
            &capture(1, 0xFFF8),
            &params,
            &emissivity,
            None,
            &QuantizationModel::Exact,
        )
        .unwrap(),
    );
    let grid = merged.mean_grid().unwrap();
    assert_eq!(grid.dim(), (FRAME_HEIGHT, FRAME_WIDTH));
}

#[test]
fn warmer_scene_reads_warmer_across_the_grid() {
    let params = params();
    let emissivity = UncertainValue::exact(0.95);
    let cold = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    let warm = compensate_subpage(
        &capture(0, 300),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    for pixel in 0..PIXEL_COUNT {
        if let (Some(c), Some(w)) = (cold.pixel(pixel), warm.pixel(pixel)) {
            assert!(w.mean() > c.mean());
        }
    }
}

#[test]
fn quantization_and_emissivity_uncertainty_propagate() {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    let params = params();
    let samples = 20_000;
    let mut rng = ChaCha8Rng::seed_from_u64(4242);
    let emissivity = UncertainValue::uniform(0.93, 0.97, samples, &mut rng).unwrap();

    let result = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &emissivity,
        None,
        &QuantizationModel::Ensemble { samples, seed: 4242 },
    )
    .unwrap();

    let to = result.pixel(0).unwrap();
    assert_eq!(to.len(), samples);
    assert!(to.std_dev() > 0.0);
    // The ensemble straddles the exact answer computed at the emissivity
    // midpoint.
    let expected = expected_temperature(&params, -8, 0.95);
    assert!(to.min() < expected && expected < to.max());
    assert_relative_eq!(to.mean(), expected, epsilon = 0.1);
}

#[test]
fn lower_emissivity_amplifies_the_signal_estimate() {
    let params = params();
    // The fixture's pixels read below the radiometric background, so
    // dividing by a smaller emissivity pushes the estimate further from it.
    let shiny = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &UncertainValue::exact(0.5),
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    let matte = compensate_subpage(
        &capture(0, 0xFFF8),
        &params,
        &UncertainValue::exact(0.95),
        None,
        &QuantizationModel::Exact,
    )
    .unwrap();
    assert!(shiny.pixel(0).unwrap().mean() < matte.pixel(0).unwrap().mean());
}
