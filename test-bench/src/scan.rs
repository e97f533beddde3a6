//! Serpentine grid scan plans.
//!
//! A scan is two nested loops of relative gantry moves. The inner loop steps
//! across a row, capturing before each step; after every row the outer step
//! is applied and the inner direction reverses, so the gantry never travels
//! back across a row it just covered.

use std::path::Path;
use std::time::Duration;

use rig_hardware::gantry::{Axis, StepPosition};
use serde::{Deserialize, Serialize};

use crate::ScanError;

/// Pause after each move used by the fixed scans.
pub const DEFAULT_DWELL_MS: u64 = 1000;

/// Rows and columns in the fixed scans.
const PRESET_STEPS: i64 = 20;

/// A grid scan, as relative step moves from the home position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridScan {
    /// Relative move from home to the first scan point
    pub start: StepPosition,
    /// Step between points within a row (negated on every other row)
    pub inner_step: StepPosition,
    pub inner_count: usize,
    /// Step between rows
    pub outer_step: StepPosition,
    pub outer_count: usize,
    /// Capture at every scan point
    #[serde(default = "default_capture")]
    pub capture: bool,
    /// Pause after each move, milliseconds
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
}

fn default_capture() -> bool {
    true
}

fn default_dwell_ms() -> u64 {
    DEFAULT_DWELL_MS
}

/// One step of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAction {
    /// Take an image at the current point, labelled by its planned position.
    Capture { label: String },
    /// Relative move in steps.
    Move(StepPosition),
}

impl GridScan {
    /// Scan of the y/z plane at x = 100 mm.
    ///
    /// y covers 77000 steps and z 67000 steps, 20 points each.
    pub fn yz_plane() -> Self {
        Self {
            start: StepPosition::new(Axis::X.to_steps(100.0), 0, 0, 0, 0),
            inner_step: StepPosition::new(0, 77_000 / PRESET_STEPS, 0, 0, 0),
            inner_count: PRESET_STEPS as usize,
            outer_step: StepPosition::new(0, 0, 67_000 / PRESET_STEPS, 0, 0),
            outer_count: PRESET_STEPS as usize,
            capture: true,
            dwell_ms: DEFAULT_DWELL_MS,
        }
    }

    /// Scan of a plane tilted in x/y.
    ///
    /// Rows run diagonally from (x, y) = (0, 62000) towards (130000, 40000);
    /// z covers 67000 steps. 20 points each.
    pub fn tilted_plane() -> Self {
        let (x_top, y_top) = (0, 62_000);
        let (x_bottom, y_bottom) = (130_000, 40_000);
        Self {
            start: StepPosition::new(x_top, y_top, 0, 0, 0),
            inner_step: StepPosition::new(
                (x_bottom - x_top) / PRESET_STEPS,
                (y_bottom - y_top) / PRESET_STEPS,
                0,
                0,
                0,
            ),
            inner_count: PRESET_STEPS as usize,
            outer_step: StepPosition::new(0, 0, 67_000 / PRESET_STEPS, 0, 0),
            outer_count: PRESET_STEPS as usize,
            capture: true,
            dwell_ms: DEFAULT_DWELL_MS,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ScanError> {
        let plan: Self =
            serde_json::from_str(text).map_err(|e| ScanError::Plan(format!("invalid plan: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string_pretty(self).map_err(|e| ScanError::Plan(e.to_string()))
    }

    /// Reject plans that would not visit any point.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.inner_count == 0 || self.outer_count == 0 {
            return Err(ScanError::Plan(format!(
                "scan needs at least one row and one point per row, got {} x {}",
                self.outer_count, self.inner_count
            )));
        }
        if self.inner_step.is_zero() {
            return Err(ScanError::Plan("inner step is zero".to_string()));
        }
        Ok(())
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Number of scan points visited.
    pub fn points(&self) -> usize {
        self.inner_count * self.outer_count
    }

    /// The scan as a flat list of captures and relative moves, starting at
    /// [`start`](Self::start).
    pub fn actions(&self) -> Vec<ScanAction> {
        let per_row = self.inner_count * (1 + usize::from(self.capture)) + 1;
        let mut actions = Vec::with_capacity(per_row * self.outer_count);
        let mut position = self.start;
        let mut step = self.inner_step;

        for _ in 0..self.outer_count {
            for _ in 0..self.inner_count {
                if self.capture {
                    actions.push(ScanAction::Capture {
                        label: point_label(&position),
                    });
                }
                actions.push(ScanAction::Move(step));
                position = position.offset_by(step);
            }
            actions.push(ScanAction::Move(self.outer_step));
            position = position.offset_by(self.outer_step);
            step = step.reversed();
        }
        actions
    }
}

/// Image label for a scan point, e.g. `z3350_y7700_x8985`.
pub fn point_label(position: &StepPosition) -> String {
    format!("z{}_y{}_x{}", position.z, position.y, position.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(actions: &[ScanAction]) -> Vec<StepPosition> {
        actions
            .iter()
            .filter_map(|a| match a {
                ScanAction::Move(delta) => Some(*delta),
                ScanAction::Capture { .. } => None,
            })
            .collect()
    }

    fn small_scan() -> GridScan {
        GridScan {
            start: StepPosition::new(10, 0, 0, 0, 0),
            inner_step: StepPosition::new(0, 100, 0, 0, 0),
            inner_count: 2,
            outer_step: StepPosition::new(0, 0, 50, 0, 0),
            outer_count: 2,
            capture: true,
            dwell_ms: 0,
        }
    }

    #[test]
    fn test_serpentine_actions() {
        let actions = small_scan().actions();
        let y = |v| ScanAction::Move(StepPosition::new(0, v, 0, 0, 0));
        let z = ScanAction::Move(StepPosition::new(0, 0, 50, 0, 0));
        let capture = |label: &str| ScanAction::Capture {
            label: label.to_string(),
        };

        assert_eq!(
            actions,
            vec![
                capture("z0_y0_x10"),
                y(100),
                capture("z0_y100_x10"),
                y(100),
                z.clone(),
                capture("z50_y200_x10"),
                y(-100),
                capture("z50_y100_x10"),
                y(-100),
                z,
            ]
        );
    }

    #[test]
    fn test_moves_without_capture() {
        let scan = GridScan {
            capture: false,
            ..small_scan()
        };
        let actions = scan.actions();
        assert_eq!(actions.len(), 6);
        assert!(actions.iter().all(|a| matches!(a, ScanAction::Move(_))));
    }

    #[test]
    fn test_yz_plane_preset() {
        let scan = GridScan::yz_plane();
        assert_eq!(scan.start, StepPosition::new(8985, 0, 0, 0, 0));
        assert_eq!(scan.inner_step.y, 3850);
        assert_eq!(scan.outer_step.z, 3350);
        assert_eq!(scan.points(), 400);

        let actions = scan.actions();
        assert_eq!(actions.len(), 20 * (2 * 20 + 1));
        let net = moves(&actions)
            .into_iter()
            .fold(StepPosition::default(), StepPosition::offset_by);
        // Even number of rows returns y to its start
        assert_eq!(net, StepPosition::new(0, 0, 67_000, 0, 0));
    }

    #[test]
    fn test_tilted_plane_preset() {
        let scan = GridScan::tilted_plane();
        assert_eq!(scan.start, StepPosition::new(0, 62_000, 0, 0, 0));
        assert_eq!(scan.inner_step, StepPosition::new(6500, -1100, 0, 0, 0));
        assert_eq!(scan.outer_step, StepPosition::new(0, 0, 3350, 0, 0));

        let second_row = scan.actions()[2 * 20 + 1..].to_vec();
        assert_eq!(
            second_row[0],
            ScanAction::Capture {
                label: "z3350_y40000_x130000".to_string()
            }
        );
        assert_eq!(
            second_row[1],
            ScanAction::Move(StepPosition::new(-6500, 1100, 0, 0, 0))
        );
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "start": {"x": 0, "y": 0, "z": 0, "theta": 0, "phi": 0},
            "inner_step": {"x": 0, "y": 500, "z": 0, "theta": 0, "phi": 0},
            "inner_count": 4,
            "outer_step": {"x": 0, "y": 0, "z": 500, "theta": 0, "phi": 0},
            "outer_count": 3
        }"#;
        let scan = GridScan::from_json(json).unwrap();
        assert!(scan.capture);
        assert_eq!(scan.dwell(), Duration::from_secs(1));
        assert_eq!(GridScan::from_json(&scan.to_json().unwrap()).unwrap(), scan);
    }

    #[test]
    fn test_invalid_plans_rejected() {
        let empty = GridScan {
            inner_count: 0,
            ..small_scan()
        };
        assert!(matches!(empty.validate(), Err(ScanError::Plan(_))));

        let stationary = GridScan {
            inner_step: StepPosition::default(),
            ..small_scan()
        };
        assert!(matches!(stationary.validate(), Err(ScanError::Plan(_))));

        assert!(matches!(
            GridScan::from_json("{\"start\": 3}"),
            Err(ScanError::Plan(_))
        ));
    }
}
