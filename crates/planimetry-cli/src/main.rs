//! Command line front end for the planimetry pipeline.
//!
//! Thin glue over the library contracts: every subcommand loads models,
//! calls one pipeline operation, and prints a JSON result on stdout.
//! Soft failures (uncalibrated models, rejected points) print an
//! error-shaped JSON object and exit cleanly, so callers can probe
//! whether a measurement is computable; resource failures exit non-zero.

use clap::{Parser, Subcommand};
use nalgebra::{Point2, Vector2};
use planimetry::lens::{CalibrateError, CorrectImageError, LensIoError, MapError};
use planimetry::perspective::{PerspectiveIoError, RectifyImageError};
use planimetry::{
    gray_view, image_from_gray_buffer, undistorted_quad, BoardSpec, ImageSequence,
    ImageSequenceError, LensCalibration, MeasurementFrame, PerspectiveCalibration, Quad, TrueSize,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "planimetry",
    version,
    about = "Planar measurements from calibrated camera footage"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lens distortion calibration and correction.
    #[command(subcommand)]
    Lens(LensCommand),
    /// Perspective calibration and rectification.
    #[command(subcommand)]
    Perspective(PerspectiveCommand),
    /// Real-world measurements from calibrated models.
    #[command(subcommand)]
    Measure(MeasureCommand),
}

#[derive(Subcommand)]
enum LensCommand {
    /// Calibrate from a directory of numbered chessboard frames.
    Calibrate {
        /// Directory holding numerically named frames (1.jpg, 2.jpg, ...).
        #[arg(long)]
        frames: PathBuf,
        /// Output calibration file.
        #[arg(long)]
        out: PathBuf,
        /// Stop after this many valid detections (0 = default bound).
        #[arg(long, default_value_t = 0)]
        max_frames: usize,
        /// Inner corners per board row.
        #[arg(long, default_value_t = 15)]
        cols: usize,
        /// Inner corners per board column.
        #[arg(long, default_value_t = 8)]
        rows: usize,
        /// Physical side of one board square, in real units.
        #[arg(long, default_value_t = 18.0)]
        square_size: f64,
    },
    /// Undistort a single pixel coordinate.
    Point {
        #[arg(long)]
        calib: PathBuf,
        #[arg(long, value_parser = parse_point)]
        point: Point2<f64>,
    },
    /// Undistort a whole image.
    Image {
        #[arg(long)]
        calib: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum PerspectiveCommand {
    /// Calibrate from four reference corners and the true rectangle size.
    Calibrate {
        /// Corners in top-left, top-right, bottom-left, bottom-right order.
        #[arg(long, value_parser = parse_point, num_args = 4)]
        points: Vec<Point2<f64>>,
        /// Real WIDTH,HEIGHT of the rectangle.
        #[arg(long, value_parser = parse_size)]
        size: TrueSize,
        /// Lens calibration applied to the corners first.
        #[arg(long)]
        lens: Option<PathBuf>,
        /// Shift the rectified rectangle by X,Y pixels.
        #[arg(long, value_parser = parse_point)]
        translate: Option<Point2<f64>>,
        /// Output calibration file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Rectify a single pixel coordinate.
    Point {
        #[arg(long)]
        calib: PathBuf,
        #[arg(long, value_parser = parse_point)]
        point: Point2<f64>,
    },
    /// Rectify a whole image.
    Image {
        #[arg(long)]
        calib: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum MeasureCommand {
    /// Real-world coordinate of a pixel relative to the origin.
    Coordinate {
        #[arg(long)]
        lens: PathBuf,
        #[arg(long)]
        perspective: PathBuf,
        #[arg(long, value_parser = parse_point)]
        origin: Point2<f64>,
        #[arg(long, value_parser = parse_point)]
        point: Point2<f64>,
    },
    /// Real-world distance between two pixels.
    Distance {
        #[arg(long)]
        lens: PathBuf,
        #[arg(long)]
        perspective: PathBuf,
        #[arg(long, value_parser = parse_point)]
        origin: Point2<f64>,
        #[arg(long, value_parser = parse_point)]
        from: Point2<f64>,
        #[arg(long, value_parser = parse_point)]
        to: Point2<f64>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    LensIo(#[from] LensIoError),
    #[error(transparent)]
    PerspectiveIo(#[from] PerspectiveIoError),
    #[error(transparent)]
    Frames(#[from] ImageSequenceError),
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    CorrectImage(#[from] CorrectImageError),
    #[error(transparent)]
    RectifyImage(#[from] RectifyImageError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Usage(&'static str),
}

fn parse_point(raw: &str) -> Result<Point2<f64>, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got `{raw}`"))?;
    let x = x.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let y = y.trim().parse::<f64>().map_err(|e| e.to_string())?;
    Ok(Point2::new(x, y))
}

fn parse_size(raw: &str) -> Result<TrueSize, String> {
    let p = parse_point(raw)?;
    Ok(TrueSize {
        width: p.x,
        height: p.y,
    })
}

fn load_lens(path: &Path) -> Result<LensCalibration, CliError> {
    let mut lens = LensCalibration::default();
    lens.load(path)?;
    Ok(lens)
}

fn load_perspective(path: &Path) -> Result<PerspectiveCalibration, CliError> {
    let mut perspective = PerspectiveCalibration::new();
    perspective.load(path)?;
    Ok(perspective)
}

/// Soft failure: an error-shaped JSON result rather than a process fault.
fn print_unavailable(reason: &str) {
    println!("{}", serde_json::json!({ "error": reason }));
}

fn print_point(p: Point2<f64>) {
    println!("{}", serde_json::json!({ "x": p.x, "y": p.y }));
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Lens(cmd) => run_lens(cmd),
        Command::Perspective(cmd) => run_perspective(cmd),
        Command::Measure(cmd) => run_measure(cmd),
    }
}

fn run_lens(cmd: LensCommand) -> Result<(), CliError> {
    match cmd {
        LensCommand::Calibrate {
            frames,
            out,
            max_frames,
            cols,
            rows,
            square_size,
        } => {
            let board = BoardSpec {
                cols,
                rows,
                square_size,
            };
            let mut lens = LensCalibration::new(board);
            let sequence = ImageSequence::open(&frames)?;
            let report = lens.calibrate_from_frames(sequence, max_frames)?;
            lens.save(&out)?;
            println!(
                "{}",
                serde_json::json!({
                    "frames_used": report.frames_used,
                    "rms_error": report.rms_error,
                })
            );
        }
        LensCommand::Point { calib, point } => {
            let lens = load_lens(&calib)?;
            match lens.correct_point(point) {
                Some(corrected) => print_point(corrected),
                None => print_unavailable("point could not be corrected"),
            }
        }
        LensCommand::Image {
            calib,
            input,
            output,
        } => {
            let mut lens = load_lens(&calib)?;
            lens.build_undistortion_map()?;
            let raw = image::open(&input)?.to_luma8();
            let corrected = lens.correct_image(&gray_view(&raw))?;
            let corrected = image_from_gray_buffer(&corrected)
                .ok_or(CliError::Usage("corrected image has unsupported dimensions"))?;
            corrected.save(&output)?;
        }
    }
    Ok(())
}

fn run_perspective(cmd: PerspectiveCommand) -> Result<(), CliError> {
    match cmd {
        PerspectiveCommand::Calibrate {
            points,
            size,
            lens,
            translate,
            out,
        } => {
            let quad = Quad::from_slice(&points)
                .ok_or(CliError::Usage("expected exactly four corner points"))?;

            let quad = match lens {
                Some(path) => {
                    let lens = load_lens(&path)?;
                    match undistorted_quad(&lens, &quad) {
                        Some(corrected) => corrected,
                        None => {
                            print_unavailable("corner points could not be lens-corrected");
                            return Ok(());
                        }
                    }
                }
                None => quad,
            };

            let translation = translate
                .map(|p| Vector2::new(p.x, p.y))
                .unwrap_or_else(Vector2::zeros);

            let mut perspective = PerspectiveCalibration::new();
            if !perspective.calibrate_from_true_size(&quad, size, translation) {
                print_unavailable("perspective calibration failed");
                return Ok(());
            }
            perspective.save(&out)?;
            println!(
                "{}",
                serde_json::json!({ "scale_factor": perspective.scale_factor() })
            );
        }
        PerspectiveCommand::Point { calib, point } => {
            let perspective = load_perspective(&calib)?;
            match perspective.rectify_point(point) {
                Some(rectified) => print_point(rectified),
                None => print_unavailable("point could not be rectified"),
            }
        }
        PerspectiveCommand::Image {
            calib,
            input,
            output,
        } => {
            let perspective = load_perspective(&calib)?;
            let raw = image::open(&input)?.to_luma8();
            let rectified = perspective.rectify_image(&gray_view(&raw))?;
            let rectified = image_from_gray_buffer(&rectified)
                .ok_or(CliError::Usage("rectified image has unsupported dimensions"))?;
            rectified.save(&output)?;
        }
    }
    Ok(())
}

fn run_measure(cmd: MeasureCommand) -> Result<(), CliError> {
    match cmd {
        MeasureCommand::Coordinate {
            lens,
            perspective,
            origin,
            point,
        } => {
            let mut lens = load_lens(&lens)?;
            lens.build_undistortion_map()?;
            let perspective = load_perspective(&perspective)?;

            let Some(frame) = MeasurementFrame::with_origin(&lens, &perspective, origin) else {
                print_unavailable("origin could not be anchored");
                return Ok(());
            };
            match frame.real_coordinate(point) {
                Some(coordinate) => print_point(coordinate),
                None => print_unavailable("coordinate is not measurable"),
            }
        }
        MeasureCommand::Distance {
            lens,
            perspective,
            origin,
            from,
            to,
        } => {
            let mut lens = load_lens(&lens)?;
            lens.build_undistortion_map()?;
            let perspective = load_perspective(&perspective)?;

            let Some(frame) = MeasurementFrame::with_origin(&lens, &perspective, origin) else {
                print_unavailable("origin could not be anchored");
                return Ok(());
            };
            match frame.real_distance(from, to) {
                Some(distance) => {
                    println!("{}", serde_json::json!({ "distance": distance }));
                }
                None => print_unavailable("distance is not measurable"),
            }
        }
    }
    Ok(())
}
