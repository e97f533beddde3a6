//! USB cameras driven through the `gphoto2` command-line utility.
//!
//! Cameras are identified by serial number rather than USB port, since port
//! numbers change whenever a camera is re-plugged. A small map file assigns
//! each serial a stable index, and captured images are named after that index.

mod args;
mod gphoto;
pub mod mock;
mod registry;
mod rig;

use std::path::PathBuf;

use thiserror::Error;

pub use args::CameraArgs;
pub use gphoto::{
    format_settings, parse_auto_detect, parse_current_value, parse_serial_number, CameraCli,
    DetectedCamera, Gphoto2Cli, DEFAULT_GPHOTO2,
};
pub use registry::{CameraMap, DEFAULT_CAMERA_MAP};
pub use rig::{CameraRig, CameraVitals, CapturedImage, CAPTURE_TARGET_RAM};

/// Errors from camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The `gphoto2` program could not be started.
    #[error("Failed to run {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `gphoto2` exited with a failure status.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Output from `gphoto2` was missing an expected field.
    #[error("Unexpected gphoto2 output: {0}")]
    InvalidOutput(String),

    /// A camera's summary had no serial number.
    #[error("No serial number reported by camera on {port}")]
    MissingSerial { port: String },

    /// No usable camera was detected (or none of them is in the camera map).
    #[error("No cameras available")]
    NoCameras,

    #[error("Camera {0} is not connected")]
    UnknownCamera(usize),

    /// The camera map file is malformed.
    #[error("Camera map {path} line {line}: {reason}")]
    MapFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;
