//! 5-axis gantry: unit conversion, persisted position, and motion control.

mod args;
mod axis;
mod controller;
mod position_store;
pub mod units;

pub use args::GantryArgs;
pub use axis::{Axes, Axis, AxisSpeeds, AxisTargets, PhysicalPosition, StepPosition};
pub use controller::{
    GantryController, GantryError, GantryResult, GantrySettings, MotionPhase, DEFAULT_SPEED,
    HOME_JOG_SPEED, ROTATION_SMOOTHING,
};
pub use position_store::{PositionStore, StoreError, StoreResult, DEFAULT_POSITION_FILE};
