//! 5-axis gantry controller.
//!
//! Drives the rig's Galil DMC controller: absolute and relative moves, homing
//! against the x/y/z reverse limit switches, and position tracking through the
//! persisted position record.
//!
//! # Motion Sequence
//!
//! Every move and homing run walks the same phases:
//!
//! ```text
//! Idle -> SpeedSet -> CommandIssued -> MotionBegun -> MotionComplete -> PositionPersisted -> Idle
//! ```
//!
//! Any device failure along the way stops and disables the motors, reads the
//! controller's error code, and latches the controller in [`MotionPhase::Faulted`].
//! A faulted controller refuses further motion; the caller is expected to
//! drop it (closing the connection) and exit.
//!
//! # Example
//!
//! ```no_run
//! use rig_hardware::gantry::{GantryController, GantrySettings, PositionStore, StepPosition};
//!
//! let store = PositionStore::new("galil_last_position.txt");
//! let mut gantry = GantryController::connect("192.168.42.10", 23, store, GantrySettings::default())?;
//!
//! gantry.home()?;
//! gantry.move_relative(StepPosition::new(1000, 0, 0, 0, 0), None)?;
//! println!("Now at {}", gantry.position());
//! # Ok::<(), rig_hardware::gantry::GantryError>(())
//! ```

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::axis::{Axes, Axis, AxisSpeeds, AxisTargets, PhysicalPosition, StepPosition};
use super::position_store::{PositionStore, StoreError};
use super::units;
use crate::galil::{ControllerErrorCode, DmcDevice, DmcError, DmcLink, DmcResult};

/// Default speed for every axis, steps per second.
pub const DEFAULT_SPEED: f64 = 1000.0;

/// Jog speed used to drive x/y/z into their reverse limit switches.
pub const HOME_JOG_SPEED: f64 = -1000.0;

/// Smoothing applied to the rotation axes (`KS`) at startup.
pub const ROTATION_SMOOTHING: f64 = 25.0;

/// Pause after motion completes before reading back the position.
const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(1);

/// Wall-clock limit on a single motion-complete wait.
const DEFAULT_MOTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Interval between `_BG` polls while waiting for motion.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Step in the move/home sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MotionPhase {
    Idle,
    SpeedSet,
    CommandIssued,
    MotionBegun,
    MotionComplete,
    PositionPersisted,
    Faulted,
}

/// Errors from gantry operations.
#[derive(Error, Debug)]
pub enum GantryError {
    /// The persisted position could not be loaded at startup.
    #[error("Gantry configuration error: {0}")]
    Configuration(#[source] StoreError),

    /// A completed move could not be persisted. The controller is latched faulted.
    #[error("Position storage failed: {0}")]
    Storage(#[source] StoreError),

    /// Communication failure outside of a motion sequence (startup, queries).
    #[error("Device communication error: {0}")]
    Communication(#[from] DmcError),

    /// Failure during a move or homing. Motors were stopped and disabled.
    #[error(
        "Device fault during {operation} after {phase}: {source} (controller {})",
        .error_code.as_ref().map_or_else(|| "error code unavailable".to_string(), |c| c.to_string())
    )]
    DeviceFault {
        operation: &'static str,
        phase: MotionPhase,
        error_code: Option<ControllerErrorCode>,
        #[source]
        source: DmcError,
    },

    /// A previous fault latched the controller; no further motion is allowed.
    #[error("Gantry is faulted; inspect the hardware and reconnect")]
    Faulted,

    #[error("Invalid speed {speed} for axis {axis}; speeds must be positive")]
    InvalidSpeed { axis: Axis, speed: f64 },

    #[error("Invalid target {value} for axis {axis}")]
    InvalidTarget { axis: Axis, value: f64 },
}

/// Result type for gantry operations.
pub type GantryResult<T> = Result<T, GantryError>;

/// Tunable motion parameters.
#[derive(Debug, Clone)]
pub struct GantrySettings {
    /// Speeds used when a move doesn't specify its own
    pub default_speeds: AxisSpeeds,
    /// Jog speed for homing, steps per second (negative drives toward the reverse limit)
    pub home_jog_speed: f64,
    /// Pause after motion completes
    pub settle_time: Duration,
    /// Limit on each motion-complete wait
    pub motion_timeout: Duration,
    /// Interval between motion-complete polls
    pub poll_interval: Duration,
}

impl Default for GantrySettings {
    fn default() -> Self {
        Self {
            default_speeds: AxisSpeeds::splat(DEFAULT_SPEED),
            home_jog_speed: HOME_JOG_SPEED,
            settle_time: DEFAULT_SETTLE_TIME,
            motion_timeout: DEFAULT_MOTION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Controller for the 5-axis gantry.
///
/// Owns the link to the motion controller exclusively; the connection closes
/// when the controller is dropped.
pub struct GantryController<L: DmcLink> {
    link: L,
    store: PositionStore,
    settings: GantrySettings,
    position: StepPosition,
    phase: MotionPhase,
}

impl GantryController<DmcDevice> {
    /// Connect to the DMC controller over TCP and restore the persisted position.
    pub fn connect(
        ip: &str,
        port: u16,
        store: PositionStore,
        settings: GantrySettings,
    ) -> GantryResult<Self> {
        let device = DmcDevice::connect(format!("{ip}:{port}"))?;
        Self::open(device, store, settings)
    }
}

impl<L: DmcLink> GantryController<L> {
    /// Initialize the controller over an established link.
    ///
    /// Loads the persisted position and defines it on the device (`DP`),
    /// enables the motors (`SH`) and sets smoothing on the rotation axes (`KS`).
    ///
    /// # Errors
    ///
    /// [`GantryError::Configuration`] if the position record is missing or
    /// malformed. Nothing is sent to the device in that case.
    pub fn open(mut link: L, store: PositionStore, settings: GantrySettings) -> GantryResult<Self> {
        let position = store.load().map_err(GantryError::Configuration)?;

        info!(
            "Restoring position {} from {}",
            position,
            store.path().display()
        );
        link.command(&format!("DP {}", position.to_command_fields()))?;

        info!("Enabling motors");
        link.command("SH")?;

        info!("Setting smoothing on theta, phi axes");
        link.command(&format!("KS ,,,{ROTATION_SMOOTHING},{ROTATION_SMOOTHING}"))?;

        Ok(Self {
            link,
            store,
            settings,
            position,
            phase: MotionPhase::Idle,
        })
    }

    /// Last known position in steps (as of the most recent query or move).
    pub fn position(&self) -> StepPosition {
        self.position
    }

    /// Last known position in mm / degrees.
    pub fn position_physical(&self) -> PhysicalPosition {
        units::to_physical(self.position)
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn is_faulted(&self) -> bool {
        self.phase == MotionPhase::Faulted
    }

    pub fn settings(&self) -> &GantrySettings {
        &self.settings
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    // ==================== Queries ====================

    /// Query the device for the current position of all 5 axes.
    ///
    /// # Errors
    ///
    /// [`GantryError::Communication`] if the query fails or the response
    /// doesn't hold exactly 5 numeric fields.
    pub fn query_position(&mut self) -> GantryResult<StepPosition> {
        Ok(self.read_position()?)
    }

    /// Query the current position in mm / degrees.
    pub fn query_position_physical(&mut self) -> GantryResult<PhysicalPosition> {
        Ok(units::to_physical(self.query_position()?))
    }

    /// Read the reverse limit switch of an axis (`MG _LRx`).
    ///
    /// The controller reports 1 while the switch is open and 0 once the axis
    /// sits on it.
    pub fn reverse_limit_engaged(&mut self, axis: Axis) -> GantryResult<bool> {
        Ok(self.read_reverse_limit(axis)?)
    }

    // ==================== Motion ====================

    /// Move to an absolute position given in mm / degrees.
    ///
    /// Axes whose target is `None` keep their current step value.
    pub fn move_absolute(
        &mut self,
        targets: AxisTargets,
        speeds: Option<AxisSpeeds>,
    ) -> GantryResult<StepPosition> {
        self.ensure_ready()?;
        let speeds = self.resolve_speeds(speeds)?;
        for (axis, target) in targets.iter() {
            if let Some(value) = target.filter(|v| !v.is_finite()) {
                return Err(GantryError::InvalidTarget { axis, value });
            }
        }

        let position = self.run_motion("absolute move", |g| {
            let current = g.read_position()?;
            let target = targets.map(|axis, target| match target {
                Some(value) => axis.to_steps(value),
                None => *current.get(axis),
            });
            info!("Absolute move from {} to {}", current, target);

            g.set_speeds(&speeds)?;
            g.issue(&format!("PA {}", target.to_command_fields()))?;
            g.begin("")?;
            g.wait_motion_complete()?;
            g.settle();
            g.read_position()
        })?;

        self.persist(position)?;
        Ok(position)
    }

    /// Move by a relative distance in steps.
    pub fn move_relative(
        &mut self,
        delta: StepPosition,
        speeds: Option<AxisSpeeds>,
    ) -> GantryResult<StepPosition> {
        self.ensure_ready()?;
        let speeds = self.resolve_speeds(speeds)?;

        let position = self.run_motion("relative move", |g| {
            info!("Relative move by {} from {}", delta, g.position);

            g.set_speeds(&speeds)?;
            g.issue(&format!("PR {}", delta.to_command_fields()))?;
            g.begin("")?;
            g.wait_motion_complete()?;
            g.settle();
            g.read_position()
        })?;

        self.persist(position)?;
        Ok(position)
    }

    /// Move by a relative distance in mm / degrees.
    ///
    /// Each axis is rounded to the nearest whole step before moving.
    pub fn move_relative_physical(
        &mut self,
        delta: PhysicalPosition,
        speeds: Option<AxisSpeeds>,
    ) -> GantryResult<StepPosition> {
        for (axis, value) in delta.iter() {
            if !value.is_finite() {
                return Err(GantryError::InvalidTarget { axis, value });
            }
        }
        self.move_relative(units::to_steps(delta), speeds)
    }

    /// Drive x, y and z into their reverse limit switches and define that as the origin.
    ///
    /// Axes already sitting on their switch are not driven. Only driven axes
    /// are named in the begin command; otherwise the controller would keep a
    /// stale begin state on the idle axes. Theta and phi are not referenced
    /// and keep their step values.
    pub fn home(&mut self) -> GantryResult<StepPosition> {
        self.ensure_ready()?;
        let jog_speed = self.settings.home_jog_speed;

        let position = self.run_motion("homing", |g| {
            let before = g.read_position()?;
            info!("Position before homing: {}", before);

            let mut jog = AxisSpeeds::splat(0.0);
            let mut begin_axes = String::new();
            for axis in Axis::LINEAR {
                let engaged = g.read_reverse_limit(axis)?;
                debug!("Reverse limit {} engaged: {}", axis.letter(), engaged);
                if !engaged {
                    *jog.get_mut(axis) = jog_speed;
                    begin_axes.push(axis.letter());
                }
            }

            g.issue(&format!("JG {}", jog.to_command_fields()))?;
            g.phase = MotionPhase::SpeedSet;

            if begin_axes.is_empty() {
                info!("All reverse limit switches engaged, no motion needed");
            } else {
                info!("Jogging axes {} to their reverse limits", begin_axes);
                g.begin(&begin_axes)?;
            }

            g.wait_motion_complete()?;
            g.settle();

            g.issue("DP 0,0,0")?;
            let after = g.read_position()?;
            info!("Position after homing: {}", after);
            Ok(after)
        })?;

        self.persist(position)?;
        Ok(position)
    }

    // ==================== Internals ====================

    fn ensure_ready(&self) -> GantryResult<()> {
        if self.is_faulted() {
            return Err(GantryError::Faulted);
        }
        Ok(())
    }

    fn resolve_speeds(&self, speeds: Option<AxisSpeeds>) -> GantryResult<AxisSpeeds> {
        let speeds = speeds.unwrap_or(self.settings.default_speeds);
        for (axis, speed) in speeds.iter() {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(GantryError::InvalidSpeed { axis, speed });
            }
        }
        Ok(speeds)
    }

    /// Run a motion sequence, escalating any device error into a latched fault.
    fn run_motion<T>(
        &mut self,
        operation: &'static str,
        sequence: impl FnOnce(&mut Self) -> DmcResult<T>,
    ) -> GantryResult<T> {
        self.phase = MotionPhase::Idle;
        match sequence(self) {
            Ok(value) => Ok(value),
            Err(source) => Err(self.escalate(operation, source)),
        }
    }

    /// Stop and disable the motors, read the controller's error code, and latch the fault.
    fn escalate(&mut self, operation: &'static str, source: DmcError) -> GantryError {
        let phase = self.phase;
        error!("{operation} failed after {phase}: {source}; stopping and disabling motors");

        for command in ["ST", "MO"] {
            if let Err(e) = self.link.command(command) {
                warn!("{command} failed during fault handling: {e}");
            }
        }

        let reported = match self.link.tell_error() {
            Ok(code) => Some(code),
            Err(e) => {
                warn!("Could not read controller error code: {e}");
                None
            }
        };
        let error_code = match (&source, reported) {
            (DmcError::ControllerError { code, .. }, Some(reported)) if reported.is_clear() => {
                Some(code.clone())
            }
            (DmcError::ControllerError { code, .. }, None) => Some(code.clone()),
            (_, reported) => reported.filter(|code| !code.is_clear()),
        };
        if let Some(code) = &error_code {
            error!("Controller reports {code}");
        }

        self.phase = MotionPhase::Faulted;
        GantryError::DeviceFault {
            operation,
            phase,
            error_code,
            source,
        }
    }

    fn persist(&mut self, position: StepPosition) -> GantryResult<()> {
        if let Err(e) = self.store.save(&position) {
            error!("Failed to persist position {position}: {e}");
            self.phase = MotionPhase::Faulted;
            return Err(GantryError::Storage(e));
        }
        self.phase = MotionPhase::PositionPersisted;
        info!("Saved position {} to {}", position, self.store.path().display());
        self.phase = MotionPhase::Idle;
        Ok(())
    }

    fn issue(&mut self, command: &str) -> DmcResult<String> {
        let response = self.link.command(command)?;
        if self.phase == MotionPhase::SpeedSet {
            self.phase = MotionPhase::CommandIssued;
        }
        Ok(response)
    }

    fn set_speeds(&mut self, speeds: &AxisSpeeds) -> DmcResult<()> {
        self.link.command(&format!("SP {}", speeds.to_command_fields()))?;
        self.phase = MotionPhase::SpeedSet;
        Ok(())
    }

    /// Begin motion on the named axes, or on all axes when `axes` is empty.
    ///
    /// For homing the begin is also the command that starts the jog.
    fn begin(&mut self, axes: &str) -> DmcResult<()> {
        self.issue(&format!("BG{axes}"))?;
        self.phase = MotionPhase::MotionBegun;
        Ok(())
    }

    fn read_position(&mut self) -> DmcResult<StepPosition> {
        let response = self.link.command("PA ?,?,?,?,?")?;
        let fields: [f64; 5] = DmcDevice::parse_fields(&response)?
            .try_into()
            .map_err(|fields: Vec<f64>| {
                DmcError::ParseError(format!(
                    "Expected 5 position fields, got {}: {response:?}",
                    fields.len()
                ))
            })?;
        let position = Axes::from_array(fields.map(|v| v.round() as i64));
        self.position = position;
        Ok(position)
    }

    fn read_reverse_limit(&mut self, axis: Axis) -> DmcResult<bool> {
        let response = self.link.command(&format!("MG _LR{}", axis.letter()))?;
        Ok(DmcDevice::parse_value(&response)? < 0.5)
    }

    /// Poll `_BGx` on every axis until all report 0 or the motion timeout expires.
    fn wait_motion_complete(&mut self) -> DmcResult<()> {
        let start = Instant::now();
        let mut pending: Vec<Axis> = Axis::all().collect();

        loop {
            let mut still_moving = Vec::new();
            for axis in pending {
                let response = self.link.command(&format!("MG _BG{}", axis.letter()))?;
                if DmcDevice::parse_value(&response)? != 0.0 {
                    still_moving.push(axis);
                }
            }
            pending = still_moving;

            if pending.is_empty() {
                self.phase = MotionPhase::MotionComplete;
                return Ok(());
            }

            if start.elapsed() > self.settings.motion_timeout {
                return Err(DmcError::MotionTimeout(self.settings.motion_timeout));
            }

            thread::sleep(self.settings.poll_interval);
        }
    }

    fn settle(&self) {
        if !self.settings.settle_time.is_zero() {
            thread::sleep(self.settings.settle_time);
        }
    }
}

impl<L: DmcLink> Drop for GantryController<L> {
    fn drop(&mut self) {
        debug!(
            "Releasing gantry link (last position {}, phase {})",
            self.position, self.phase
        );
    }
}
