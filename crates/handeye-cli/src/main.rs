//! `handeye`: eye-in-hand calibration from checkerboard images and logged wrist poses.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use handeye_core::euler_xyz_degrees;
use handeye_detect::ChessboardCornerDetector;
use handeye_pipeline::cloud::{realign_dir, remove_plane_dir, PlaneRemovalOptions};
use handeye_pipeline::persist::load_transform;
use handeye_pipeline::{
    init_logging, load_wrist_poses, run_from_paths, CalibrationConfig, CalibrationOutput,
    LogSink, PipelineError, WristInversion,
};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "handeye", version, about = "Eye-in-hand camera calibration")]
struct Cli {
    /// Log debug messages.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Calibrate intrinsics and the camera-to-wrist transform.
    Calibrate(CalibrateArgs),
    /// Transform camera-frame point clouds into the robot base frame.
    Realign(RealignArgs),
    /// Remove the dominant plane from point clouds.
    RemovePlane(RemovePlaneArgs),
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Directory of calibration images (sorted by file name).
    #[arg(long)]
    images: PathBuf,

    /// Wrist pose log, one `x y z qx qy qz qw` row per image.
    #[arg(long)]
    poses: PathBuf,

    /// JSON configuration. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for matrices, report and log.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Internal corners along the board width (overrides config).
    #[arg(long)]
    cols: Option<usize>,

    /// Internal corners along the board height (overrides config).
    #[arg(long)]
    rows: Option<usize>,

    /// Square size in millimetres (overrides config).
    #[arg(long)]
    square_size: Option<f64>,

    /// Continue on the common prefix when image and pose counts differ.
    #[arg(long)]
    lenient: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InversionArg {
    Rigid,
    NegateTranslation,
    AsLogged,
}

impl From<InversionArg> for WristInversion {
    fn from(arg: InversionArg) -> Self {
        match arg {
            InversionArg::Rigid => WristInversion::Rigid,
            InversionArg::NegateTranslation => WristInversion::NegateTranslation,
            InversionArg::AsLogged => WristInversion::AsLogged,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct RealignArgs {
    /// Directory of `.asc` clouds, one per logged pose in file-name order.
    #[arg(long)]
    clouds: PathBuf,

    /// Wrist pose log matching the clouds.
    #[arg(long)]
    poses: PathBuf,

    /// `Tcam2wrist_method_<name>.npz` produced by `calibrate`.
    #[arg(long)]
    transform: PathBuf,

    /// Output directory.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = InversionArg::Rigid)]
    inversion: InversionArg,
}

#[derive(Debug, Clone, Args)]
struct RemovePlaneArgs {
    /// Directory of `.asc` clouds.
    #[arg(long)]
    clouds: PathBuf,

    /// Output directory.
    #[arg(long)]
    out: PathBuf,

    /// Inlier distance in millimetres.
    #[arg(long, default_value = "3.0")]
    thresh: f64,

    #[arg(long, default_value = "1000")]
    max_iters: usize,
}

fn load_config(args: &CalibrateArgs) -> Result<CalibrationConfig> {
    let mut config = match &args.config {
        Some(path) => CalibrationConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CalibrationConfig::default(),
    };
    if let Some(cols) = args.cols {
        config.grid.cols = cols;
    }
    if let Some(rows) = args.rows {
        config.grid.rows = rows;
    }
    if let Some(s) = args.square_size {
        config.grid.square_size = s;
    }
    if args.lenient {
        config.strict_pose_count = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_summary(output: &CalibrationOutput) {
    println!("{}", output.detection.describe());
    println!(
        "mean reprojection error: {:.6} px",
        output.intrinsics.report.mean
    );
    for (method, outcome) in &output.handeye {
        match outcome.cam_to_wrist() {
            Some(x) => {
                let t = x.translation.vector;
                let e = euler_xyz_degrees(&x.rotation);
                println!(
                    "{:>12}: t = [{:.3}, {:.3}, {:.3}] mm, euler xyz = [{:.3}, {:.3}, {:.3}] deg",
                    method.name(),
                    t.x,
                    t.y,
                    t.z,
                    e.x,
                    e.y,
                    e.z
                );
            }
            None => println!("{:>12}: failed", method.name()),
        }
    }
}

fn run_calibrate(args: &CalibrateArgs, verbose: bool) -> Result<()> {
    let config = load_config(args)?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating output directory {}", args.out.display()))?;
    let log_file = args.out.join(&config.output.log_file);
    init_logging(
        Some(log_file.as_path()),
        if verbose { Level::DEBUG } else { Level::INFO },
    )?;

    let detector = ChessboardCornerDetector::default();
    match run_from_paths(&args.images, &args.poses, &args.out, &config, &detector, &LogSink) {
        Ok(output) => {
            print_summary(&output);
            Ok(())
        }
        Err(PipelineError::NoHandEyeSolution(output)) => {
            print_summary(&output);
            bail!("every hand-eye method failed")
        }
        Err(e) => Err(e).context("calibration failed"),
    }
}

fn run_realign(args: &RealignArgs) -> Result<()> {
    let cam_to_wrist = load_transform(&args.transform)
        .with_context(|| format!("loading {}", args.transform.display()))?;
    let poses = load_wrist_poses(&args.poses)
        .with_context(|| format!("loading {}", args.poses.display()))?;
    let written = realign_dir(
        &args.clouds,
        &args.out,
        &poses,
        args.inversion.into(),
        &cam_to_wrist,
    )?;
    println!("realigned {} clouds into {}", written.len(), args.out.display());
    Ok(())
}

fn run_remove_plane(args: &RemovePlaneArgs) -> Result<()> {
    let opts = PlaneRemovalOptions {
        thresh: args.thresh,
        max_iters: args.max_iters,
        ..PlaneRemovalOptions::default()
    };
    let written = remove_plane_dir(&args.clouds, &args.out, &opts)?;
    println!("wrote {} clouds to {}", written.len(), args.out.display());
    Ok(())
}

fn init_console_logging(verbose: bool) -> Result<()> {
    init_logging(None, if verbose { Level::DEBUG } else { Level::INFO })?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Calibrate(args) => run_calibrate(args, cli.verbose),
        Commands::Realign(args) => {
            init_console_logging(cli.verbose)?;
            run_realign(args)
        }
        Commands::RemovePlane(args) => {
            init_console_logging(cli.verbose)?;
            run_remove_plane(args)
        }
    }
}
