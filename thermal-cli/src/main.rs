//! Convert raw thermal sensor dumps to object temperatures.
//!
//! Takes a calibration dump and a frame dump (see [`csv_io`] for the file
//! format), runs the full compensation pipeline and reports temperatures
//! for one pixel or the whole grid, with uncertainty statistics when the
//! inputs carry distributions.

mod csv_io;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use thermal_core::{
    compensate_subpage, CalibrationParams, EepromImage, QuantizationModel, RawFrame,
    TemperatureFrame, UncertainValue, DEFAULT_ENSEMBLE_SIZE, PIXEL_COUNT,
};

/// Default emissivity interval assumed for an uncharacterized scene.
const EMISSIVITY_LO: f64 = 0.93;
const EMISSIVITY_HI: f64 = 0.97;

#[derive(Parser, Debug)]
#[command(about = "Convert raw thermal sensor dumps to temperatures")]
struct Args {
    /// Calibration dump: one line of 832 words.
    #[arg(short = 'c', long)]
    ee_data: PathBuf,

    /// Frame dump: one line of 834 words per captured subpage.
    #[arg(short = 'r', long)]
    raw_data: PathBuf,

    /// Scene emissivity. When omitted, an uncertain emissivity uniform in
    /// [0.93, 0.97] is assumed and propagated.
    #[arg(short, long)]
    emissivity: Option<f64>,

    /// Treat ADC codes as exact instead of widening them by quantization
    /// noise.
    #[arg(short = 'q', long)]
    no_quantization: bool,

    /// Pixel to report (row-major index).
    #[arg(short, long, default_value_t = 400)]
    pixel: usize,

    /// Print the whole temperature grid.
    #[arg(short = 'a', long)]
    print_all: bool,

    /// Emit the report as JSON.
    #[arg(long)]
    json: bool,

    /// Monte Carlo ensemble size.
    #[arg(long, default_value_t = DEFAULT_ENSEMBLE_SIZE)]
    samples: usize,

    /// Seed for reproducible ensembles. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Repeat the conversion this many times (for timing).
    #[arg(short = 'n', long, default_value_t = 1)]
    iterations: usize,

    /// Report conversion time.
    #[arg(short, long)]
    timing: bool,
}

#[derive(Serialize)]
struct PixelReport {
    pixel: usize,
    mean_c: f64,
    std_dev_c: f64,
    min_c: f64,
    max_c: f64,
}

#[derive(Serialize)]
struct Report {
    seed: u64,
    pixel: PixelReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    grid_c: Option<Vec<Vec<f64>>>,
}

fn pixel_report(pixel: usize, to: &UncertainValue) -> PixelReport {
    PixelReport {
        pixel,
        mean_c: to.mean(),
        std_dev_c: to.std_dev(),
        min_c: to.min(),
        max_c: to.max(),
    }
}

fn convert(
    frames: &[RawFrame],
    params: &CalibrationParams,
    emissivity: &UncertainValue,
    quantization: &QuantizationModel,
) -> Result<TemperatureFrame> {
    let mut merged = TemperatureFrame::empty();
    for frame in frames {
        let subpage = compensate_subpage(frame, params, emissivity, None, quantization)?;
        merged = merged.merge(&subpage);
    }
    Ok(merged)
}

fn run(args: &Args) -> Result<()> {
    if args.pixel >= PIXEL_COUNT {
        bail!("pixel index {} out of range (0..{})", args.pixel, PIXEL_COUNT);
    }
    if args.iterations == 0 {
        bail!("iterations must be at least 1");
    }

    let calibration = csv_io::read_records(&args.ee_data)
        .context("reading calibration dump")?
        .into_iter()
        .next()
        .context("calibration dump is empty")?;
    let image = EepromImage::from_words(&calibration)?;
    let params = CalibrationParams::from_eeprom(&image)?;
    info!(
        "calibration extracted: ranges {:?} °C, calibrated in {:?} mode",
        params.ct, params.calibration_mode
    );

    let frames: Vec<RawFrame> = csv_io::read_records(&args.raw_data)
        .context("reading frame dump")?
        .iter()
        .map(|words| RawFrame::from_words(words).map_err(Into::into))
        .collect::<Result<_>>()?;
    if frames.is_empty() {
        bail!("frame dump contains no frames");
    }
    info!("loaded {} subpage capture(s)", frames.len());

    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    let emissivity = match args.emissivity {
        Some(e) => UncertainValue::exact(e),
        None => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            UncertainValue::uniform(EMISSIVITY_LO, EMISSIVITY_HI, args.samples, &mut rng)?
        }
    };
    let quantization = if args.no_quantization {
        QuantizationModel::Exact
    } else {
        QuantizationModel::Ensemble {
            samples: args.samples,
            seed,
        }
    };

    let started = Instant::now();
    let mut merged = convert(&frames, &params, &emissivity, &quantization)?;
    for _ in 1..args.iterations {
        merged = convert(&frames, &params, &emissivity, &quantization)?;
    }
    let elapsed = started.elapsed();

    if !merged.is_complete() {
        warn!(
            "{} pixel(s) not covered by the supplied captures",
            merged.missing()
        );
    }

    let to = merged
        .pixel(args.pixel)
        .with_context(|| format!("pixel {} not covered by the supplied captures", args.pixel))?;
    let report = Report {
        seed,
        pixel: pixel_report(args.pixel, to),
        grid_c: if args.print_all {
            let grid = merged.mean_grid().context("printing the full grid")?;
            Some(grid.rows().into_iter().map(|r| r.to_vec()).collect())
        } else {
            None
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "pixel {}: {:.3} °C (std {:.3}, support [{:.3}, {:.3}])",
            report.pixel.pixel,
            report.pixel.mean_c,
            report.pixel.std_dev_c,
            report.pixel.min_c,
            report.pixel.max_c
        );
        if let Some(grid) = &report.grid_c {
            for row in grid {
                let cells: Vec<String> = row.iter().map(|t| format!("{:6.2}", t)).collect();
                println!("{}", cells.join(" "));
            }
        }
    }

    if args.timing {
        println!(
            "{} conversion(s) in {:.1} ms ({:.2} ms each)",
            args.iterations,
            elapsed.as_secs_f64() * 1e3,
            elapsed.as_secs_f64() * 1e3 / args.iterations as f64
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    run(&args)
}
