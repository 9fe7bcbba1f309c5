//! powdercal CLI: detector geometry calibration from powder ring images.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use powdercal::{
    calibrate_ellipses, CalibrantSpacing, CalibrationConfig, Calibrator, FixedParameter,
    PerImageGeometry, PowderImage,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "powdercal")]
#[command(about = "Calibrate flat area detectors from powder-diffraction calibrant rings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate one or more images of a calibrant.
    Calibrate(CliCalibrateArgs),

    /// Calibrate from ring ellipses stored as JSON.
    Ellipses(CliEllipsesArgs),

    /// Find calibrant rings in a single image.
    Rings(CliRingsArgs),

    /// Print a calibrant file and its ring angles.
    CalibrantInfo {
        /// Calibrant JSON file.
        #[arg(long)]
        calibrant: PathBuf,

        /// Wavelength (Å) used to list scattering angles.
        #[arg(long)]
        wavelength: Option<f64>,
    },
}

#[derive(Debug, Clone, Args)]
struct CliCalibrateArgs {
    /// Input images; repeat for several detector distances.
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,

    /// Detector distance per image (mm); only differences matter when the
    /// wavelength is refined.
    #[arg(long = "distance")]
    distances: Vec<f64>,

    /// Square pixel pitch in mm.
    #[arg(long)]
    pixel_size: f64,

    /// Calibrant JSON file.
    #[arg(long)]
    calibrant: PathBuf,

    /// Known wavelength in Å; fixes the wavelength in the fit.
    #[arg(long)]
    wavelength: Option<f64>,

    /// Hold the last image's distance fixed at its supplied value.
    #[arg(long, conflicts_with = "wavelength")]
    fix_distance: bool,

    /// Refine each image against the ring points after the ellipse fit.
    #[arg(long)]
    refine_points: bool,

    /// Calibration config JSON (missing fields take defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the calibration result (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliEllipsesArgs {
    /// JSON array of per-image ring ellipses.
    #[arg(long)]
    input: PathBuf,

    /// Known wavelength in Å.
    #[arg(long)]
    wavelength: Option<f64>,

    /// Calibration config JSON (only the optimiser section is used).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the calibration result (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliRingsArgs {
    /// Input image.
    #[arg(long)]
    image: PathBuf,

    /// Square pixel pitch in mm.
    #[arg(long)]
    pixel_size: f64,

    /// Calibrant JSON file.
    #[arg(long)]
    calibrant: PathBuf,

    /// Calibration config JSON (missing fields take defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the matched ellipses (JSON).
    #[arg(long)]
    out: PathBuf,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::Ellipses(args) => run_ellipses(&args),
        Commands::Rings(args) => run_rings(&args),
        Commands::CalibrantInfo {
            calibrant,
            wavelength,
        } => run_calibrant_info(&calibrant, wavelength),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<CalibrationConfig> {
    Ok(match path {
        Some(p) => CalibrationConfig::from_json_file(p)?,
        None => CalibrationConfig::default(),
    })
}

fn load_image(path: &Path) -> CliResult<PowderImage> {
    tracing::info!("Loading image: {}", path.display());
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    // 16-bit keeps the dynamic range of detector frames.
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    tracing::info!("Image size: {}x{}", w, h);
    let data = gray.into_raw().into_iter().map(f32::from).collect();
    Ok(PowderImage::from_raw(w, h, data)?.with_source(path.display().to_string()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, &json)?;
    tracing::info!("Results written to {}", path.display());
    Ok(())
}

// ── calibrate ──────────────────────────────────────────────────────────

fn run_calibrate(args: &CliCalibrateArgs) -> CliResult<()> {
    let calibrant = CalibrantSpacing::from_json_file(&args.calibrant)?;
    let config = load_config(args.config.as_deref())?;
    let images = args
        .images
        .iter()
        .map(|p| load_image(p))
        .collect::<CliResult<Vec<_>>>()?;

    let calibrator = Calibrator::with_config(config.clone());
    let result = match (images.as_slice(), args.wavelength, args.fix_distance) {
        ([image], Some(wavelength), false) if args.distances.len() <= 1 => {
            calibrator.calibrate_known_wavelength(image, wavelength, args.pixel_size, &calibrant)?
        }
        _ => {
            let fixed = match (args.wavelength, args.fix_distance) {
                (Some(w), _) => FixedParameter::Wavelength(w),
                (None, true) => {
                    let last = args
                        .distances
                        .last()
                        .ok_or("--fix-distance needs at least one --distance")?;
                    FixedParameter::Distance(*last)
                }
                (None, false) => FixedParameter::None,
            };
            let mut parameters = config.parameters.clone();
            if args.refine_points {
                parameters.refine_with_points = true;
            }
            calibrator.calibrate_multiple_images(
                &images,
                &args.distances,
                args.pixel_size,
                &calibrant,
                fixed,
                &config.ring_search,
                &parameters,
            )?
        }
    };

    tracing::info!(
        "Wavelength {:.5} Å, residual {:.3e}",
        result.wavelength_angstrom,
        result.residual
    );
    for k in 0..result.len() {
        tracing::info!(
            "Image {}: centre ({:.2}, {:.2}) px, distance {:.3} mm, tilt {:.3}° at {:.1}°",
            k,
            result.beam_centre_x[k],
            result.beam_centre_y[k],
            result.distance_mm[k],
            result.tilt_deg[k],
            result.tilt_azimuth_deg[k],
        );
    }
    write_json(&args.out, &result)
}

// ── ellipses ───────────────────────────────────────────────────────────

fn run_ellipses(args: &CliEllipsesArgs) -> CliResult<()> {
    let text = std::fs::read_to_string(&args.input)?;
    let images: Vec<PerImageGeometry> = serde_json::from_str(&text)?;
    let config = load_config(args.config.as_deref())?;
    tracing::info!(
        "Loaded {} images with {} rings",
        images.len(),
        images.iter().map(|i| i.rings.len()).sum::<usize>()
    );

    let fixed = args
        .wavelength
        .map_or(FixedParameter::None, FixedParameter::Wavelength);
    let cal = calibrate_ellipses(&images, fixed, &config.optimizer, None)?;
    tracing::info!(
        "Wavelength {:.5} Å, residual {:.3e} mm after {} evaluations",
        cal.result.wavelength_angstrom,
        cal.result.residual,
        cal.geometry_fit.evaluations,
    );
    write_json(&args.out, &cal.result)
}

// ── rings ──────────────────────────────────────────────────────────────

fn run_rings(args: &CliRingsArgs) -> CliResult<()> {
    let calibrant = CalibrantSpacing::from_json_file(&args.calibrant)?;
    let config = load_config(args.config.as_deref())?;
    let image = load_image(&args.image)?;

    let rings = Calibrator::with_config(config).find_matched_ellipses(
        &image,
        args.pixel_size,
        &calibrant,
    )?;
    tracing::info!("Matched {} of {} rings", rings.len(), calibrant.len());
    write_json(&args.out, &rings)
}

// ── calibrant-info ─────────────────────────────────────────────────────

fn run_calibrant_info(path: &Path, wavelength: Option<f64>) -> CliResult<()> {
    let calibrant = CalibrantSpacing::from_json_file(path)?;
    let d = calibrant.validated_angstrom()?;

    println!("calibrant {}", calibrant.name);
    println!("  rings:       {}", d.len());
    for (i, &s) in d.iter().enumerate() {
        let q = powdercal::q_from_d(s);
        match wavelength.and_then(|w| powdercal::two_theta(s, w)) {
            Some(tth) => println!(
                "  {:>3}  d = {:.4} Å  q = {:.4} Å⁻¹  2θ = {:.3}°",
                i,
                s,
                q,
                tth.to_degrees()
            ),
            None => println!("  {:>3}  d = {:.4} Å  q = {:.4} Å⁻¹", i, s, q),
        }
    }

    Ok(())
}
