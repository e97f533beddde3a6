//! Executes grid scans on the gantry.

use std::path::PathBuf;
use std::thread;

use rig_hardware::camera::{CameraCli, CameraRig, CapturedImage};
use rig_hardware::galil::DmcLink;
use rig_hardware::gantry::{GantryController, StepPosition};
use tracing::{info, warn};

use crate::scan::{point_label, GridScan, ScanAction};
use crate::ScanResult;

/// Outcome of a completed scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub captures: Vec<CapturedImage>,
    pub moves: usize,
    pub final_position: StepPosition,
}

/// Runs [`GridScan`]s.
#[derive(Debug, Clone)]
pub struct ScanRunner {
    output_dir: PathBuf,
    append_date: bool,
    all_cameras: bool,
}

impl ScanRunner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            append_date: true,
            all_cameras: false,
        }
    }

    /// Append a timestamp to image file names (on by default).
    pub fn append_date(mut self, append_date: bool) -> Self {
        self.append_date = append_date;
        self
    }

    /// Capture on every camera at each point instead of the selected one.
    pub fn all_cameras(mut self, all_cameras: bool) -> Self {
        self.all_cameras = all_cameras;
        self
    }

    /// Home the gantry, move to the plan's start point and walk the grid.
    ///
    /// Images are labelled from the gantry's tracked position at each point.
    /// Without cameras the grid is walked without capturing. The first error
    /// aborts the scan; a gantry fault leaves the controller latched.
    pub fn run<L: DmcLink, C: CameraCli>(
        &self,
        gantry: &mut GantryController<L>,
        mut cameras: Option<&mut CameraRig<C>>,
        plan: &GridScan,
    ) -> ScanResult<ScanReport> {
        plan.validate()?;
        std::fs::create_dir_all(&self.output_dir)?;

        let actions = plan.actions();
        info!(
            "Starting scan: {} points, {} actions, output to {}",
            plan.points(),
            actions.len(),
            self.output_dir.display()
        );

        let mut report = ScanReport::default();

        gantry.home()?;
        thread::sleep(plan.dwell());
        info!("Done locating home");

        if !plan.start.is_zero() {
            gantry.move_relative(plan.start, None)?;
            report.moves += 1;
            thread::sleep(plan.dwell());
            info!("At scan start {}", gantry.position());
        }

        for action in &actions {
            match action {
                ScanAction::Capture { label: planned } => {
                    let Some(rig) = cameras.as_deref_mut() else {
                        continue;
                    };
                    let label = point_label(&gantry.position());
                    if &label != planned {
                        warn!("Gantry at {} but plan expected {}", label, planned);
                    }
                    info!("Capturing {}", label);
                    if self.all_cameras {
                        report.captures.extend(rig.capture_all(
                            &self.output_dir,
                            &label,
                            self.append_date,
                        )?);
                    } else {
                        report.captures.push(rig.capture_image(
                            &self.output_dir,
                            &label,
                            self.append_date,
                        )?);
                    }
                }
                ScanAction::Move(delta) => {
                    gantry.move_relative(*delta, None)?;
                    report.moves += 1;
                    thread::sleep(plan.dwell());
                }
            }
        }

        report.final_position = gantry.position();
        info!(
            "Done scan: {} moves, {} images, ended at {}",
            report.moves,
            report.captures.len(),
            report.final_position
        );
        Ok(report)
    }
}
