//! Run a grid scan: home the gantry, walk a plane and photograph each point.
//!
//! Subcommands:
//! - `yz-plane`: y/z plane at x = 100 mm
//! - `tilted-plane`: plane tilted in x/y
//! - `file`: plan read from a JSON file
//! - `show`: print a preset plan as JSON (no hardware)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rig_hardware::camera::{CameraArgs, CameraRig, Gphoto2Cli};
use rig_hardware::gantry::GantryArgs;
use scan_bench::{GridScan, ScanAction, ScanRunner};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gantry grid scan with camera capture", long_about = None)]
struct Args {
    #[command(flatten)]
    gantry: GantryArgs,

    #[command(flatten)]
    cameras: CameraArgs,

    /// Directory for images and settings sidecars
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Walk the grid without cameras
    #[arg(long)]
    no_camera: bool,

    /// Capture on every camera at each point
    #[arg(long, conflicts_with = "no_camera")]
    all_cameras: bool,

    /// Don't append a timestamp to image file names
    #[arg(long)]
    no_date: bool,

    /// Override the pause after each move, milliseconds
    #[arg(long)]
    dwell_ms: Option<u64>,

    /// Print the planned actions instead of running them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    YzPlane,
    TiltedPlane,
}

impl Preset {
    fn plan(self) -> GridScan {
        match self {
            Preset::YzPlane => GridScan::yz_plane(),
            Preset::TiltedPlane => GridScan::tilted_plane(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the y/z plane at x = 100 mm
    YzPlane,

    /// Scan the plane tilted in x/y
    TiltedPlane,

    /// Scan a plan described in a JSON file
    File {
        /// Path to the plan
        plan: PathBuf,
    },

    /// Print a preset plan as JSON
    Show {
        #[arg(value_enum)]
        preset: Preset,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut plan = match &args.command {
        Command::YzPlane => Preset::YzPlane.plan(),
        Command::TiltedPlane => Preset::TiltedPlane.plan(),
        Command::File { plan } => GridScan::load(plan)
            .with_context(|| format!("Failed to load scan plan {}", plan.display()))?,
        Command::Show { preset } => {
            println!("{}", preset.plan().to_json()?);
            return Ok(());
        }
    };
    if let Some(dwell_ms) = args.dwell_ms {
        plan.dwell_ms = dwell_ms;
    }

    if args.dry_run {
        return print_actions(&plan);
    }

    let mut cameras: Option<CameraRig<Gphoto2Cli>> = if args.no_camera {
        None
    } else {
        let mut rig = args.cameras.open().context("Failed to open cameras")?;
        info!("Camera settings:\n{}", rig.settings_summary()?);
        Some(rig)
    };

    let mut gantry = args.gantry.connect().context("Failed to connect to gantry")?;

    let runner = ScanRunner::new(&args.output_dir)
        .append_date(!args.no_date)
        .all_cameras(args.all_cameras);
    let report = runner.run(&mut gantry, cameras.as_mut(), &plan)?;

    info!(
        "Scan complete: {} images in {}",
        report.captures.len(),
        args.output_dir.display()
    );
    Ok(())
}

fn print_actions(plan: &GridScan) -> Result<()> {
    println!("home");
    if !plan.start.is_zero() {
        println!("move {}", plan.start);
    }
    for action in plan.actions() {
        match action {
            ScanAction::Capture { label } => println!("capture {label}"),
            ScanAction::Move(delta) => println!("move {delta}"),
        }
    }
    Ok(())
}
