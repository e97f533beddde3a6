//! CLI tool for the rig cameras.
//!
//! Subcommands:
//! - `list`: Show detected cameras and their indices
//! - `build-map`: Renumber detected cameras by serial and rewrite the camera map
//! - `settings`: Print the filtered settings of a camera
//! - `capture`: Take a photo with one camera or all of them

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rig_hardware::camera::{CameraArgs, CameraCli, CameraRig};
use tracing::info;

/// gphoto2 camera rig tool
#[derive(Parser, Debug)]
#[command(name = "camera_tool")]
#[command(about = "Discover and capture from the rig's USB cameras")]
#[command(version)]
struct Args {
    #[command(flatten)]
    cameras: CameraArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List detected cameras
    List,

    /// Rebuild the camera map from the detected cameras
    BuildMap,

    /// Print the settings summary of a camera
    Settings {
        /// Camera index (defaults to the lowest)
        #[arg(short, long)]
        camera: Option<usize>,
    },

    /// Capture an image
    Capture {
        /// Camera index (defaults to the lowest)
        #[arg(short, long, conflicts_with = "all")]
        camera: Option<usize>,

        /// Capture on every camera
        #[arg(long)]
        all: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Label inserted into the file name
        #[arg(short, long, default_value = "img")]
        label: String,

        /// Don't append a timestamp to the file name
        #[arg(long)]
        no_date: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = Args::parse();
    if matches!(args.command, Command::BuildMap) {
        args.cameras.rebuild_camera_map = true;
    }

    let map = args.cameras.camera_map.display();
    let mut rig = args
        .cameras
        .open()
        .with_context(|| format!("Failed to open cameras ({map})"))?;

    match args.command {
        Command::List | Command::BuildMap => cmd_list(&rig),
        Command::Settings { camera } => cmd_settings(&mut rig, camera),
        Command::Capture {
            camera,
            all,
            dir,
            label,
            no_date,
        } => cmd_capture(&mut rig, camera, all, &dir, &label, !no_date),
    }
}

fn cmd_list<C: CameraCli>(rig: &CameraRig<C>) -> Result<()> {
    let ports = rig.usb_ports();
    for camera in rig.cameras() {
        info!(
            "Camera {}: Serial number: {} Address: {} Type: {}",
            camera.index, camera.serial, camera.port, camera.model
        );
    }
    info!("USB ports: {:?}", ports);
    Ok(())
}

fn cmd_settings<C: CameraCli>(rig: &mut CameraRig<C>, camera: Option<usize>) -> Result<()> {
    if let Some(index) = camera {
        rig.select(index)?;
    }
    print!("{}", rig.settings_summary()?);
    Ok(())
}

fn cmd_capture<C: CameraCli>(
    rig: &mut CameraRig<C>,
    camera: Option<usize>,
    all: bool,
    dir: &std::path::Path,
    label: &str,
    append_date: bool,
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let images = if all {
        rig.capture_all(dir, label, append_date)?
    } else {
        if let Some(index) = camera {
            rig.select(index)?;
        }
        vec![rig.capture_image(dir, label, append_date)?]
    };

    for image in &images {
        info!(
            "Camera {}: {} ({})",
            image.camera,
            image.image.display(),
            image.settings.display()
        );
    }
    Ok(())
}
