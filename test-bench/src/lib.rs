//! Grid scans of the gantry rig: move through a plane and photograph each point.

pub mod runner;
pub mod scan;

use rig_hardware::camera::CameraError;
use rig_hardware::gantry::GantryError;
use thiserror::Error;

pub use runner::{ScanReport, ScanRunner};
pub use scan::{point_label, GridScan, ScanAction};

/// Errors from planning or running a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Gantry error: {0}")]
    Gantry(#[from] GantryError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Invalid scan plan: {0}")]
    Plan(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;
