//! Hardware drivers for the gantry scan rig.
//!
//! This crate provides drivers for the two pieces of hardware on the rig: the
//! Galil DMC motion controller that moves the 5-axis gantry, and the USB
//! cameras that photograph each scan point. Each driver is feature-gated for
//! optional compilation.
//!
//! # Features
//!
//! - `galil` - Galil DMC motion controller link and the 5-axis gantry controller
//! - `gphoto` - USB cameras driven through the `gphoto2` command-line utility
//!
//! Both features are enabled by default.

#[cfg(feature = "gphoto")]
pub mod camera;

#[cfg(feature = "galil")]
pub mod galil;

#[cfg(feature = "galil")]
pub mod gantry;
