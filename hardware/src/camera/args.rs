use std::path::PathBuf;

use clap::Args;

use super::gphoto::{Gphoto2Cli, DEFAULT_GPHOTO2};
use super::registry::DEFAULT_CAMERA_MAP;
use super::rig::CameraRig;
use super::CameraResult;

/// Command-line arguments for the camera rig.
#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// File mapping camera serial numbers to indices.
    #[arg(long, default_value = DEFAULT_CAMERA_MAP)]
    pub camera_map: PathBuf,

    /// Path to the gphoto2 executable.
    #[arg(long, default_value = DEFAULT_GPHOTO2)]
    pub gphoto2: PathBuf,

    /// Renumber the detected cameras in serial order and overwrite the camera map.
    #[arg(long)]
    pub rebuild_camera_map: bool,
}

impl CameraArgs {
    pub fn open(&self) -> CameraResult<CameraRig<Gphoto2Cli>> {
        CameraRig::open(
            Gphoto2Cli::new(&self.gphoto2),
            &self.camera_map,
            self.rebuild_camera_map,
        )
    }
}
