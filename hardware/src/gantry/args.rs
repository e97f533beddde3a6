use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use super::controller::{GantryController, GantryResult, GantrySettings};
use super::position_store::{PositionStore, DEFAULT_POSITION_FILE};
use crate::galil::{DmcDevice, DmcResult, DEFAULT_GANTRY_IP, DEFAULT_PORT, DEFAULT_SOCKET_TIMEOUT};

/// Command-line arguments for connecting to the gantry.
#[derive(Args, Debug, Clone)]
pub struct GantryArgs {
    /// Galil DMC controller IP address.
    #[arg(
        long,
        default_value = DEFAULT_GANTRY_IP,
        help = "Galil DMC controller IP address",
        long_help = "IP address of the Galil DMC motion controller driving the 5-axis gantry. \
            The controller accepts commands over TCP on its command port."
    )]
    pub gantry_ip: String,

    /// Galil DMC command port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub gantry_port: u16,

    /// File holding the last confirmed gantry position.
    #[arg(
        long,
        default_value = DEFAULT_POSITION_FILE,
        help = "Persisted gantry position file",
        long_help = "One-line file of five comma-separated step counts (x,y,z,theta,phi). \
            It must exist at startup and is rewritten after every move and homing run. \
            If the gantry was moved by hand, write the true position here or home first."
    )]
    pub position_file: PathBuf,

    /// Give up on a move that hasn't completed after this many seconds.
    #[arg(long, default_value_t = 600)]
    pub motion_timeout_secs: u64,

    /// Pause after each move before reading back the position, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub settle_ms: u64,

    /// How long to wait for the controller to answer a command, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SOCKET_TIMEOUT.as_millis() as u64)]
    pub socket_timeout_ms: u64,
}

impl GantryArgs {
    /// Motion settings derived from the arguments.
    pub fn settings(&self) -> GantrySettings {
        GantrySettings {
            motion_timeout: Duration::from_secs(self.motion_timeout_secs),
            settle_time: Duration::from_millis(self.settle_ms),
            ..GantrySettings::default()
        }
    }

    /// Open the raw command link to the controller.
    pub fn device(&self) -> DmcResult<DmcDevice> {
        info!(
            "Connecting to gantry controller at {}:{}...",
            self.gantry_ip, self.gantry_port
        );
        let mut device = DmcDevice::connect(format!("{}:{}", self.gantry_ip, self.gantry_port))?;
        device.set_timeout(Duration::from_millis(self.socket_timeout_ms))?;
        Ok(device)
    }

    /// Connect to the gantry and restore its persisted position.
    pub fn connect(&self) -> GantryResult<GantryController<DmcDevice>> {
        GantryController::open(
            self.device()?,
            PositionStore::new(&self.position_file),
            self.settings(),
        )
    }
}
