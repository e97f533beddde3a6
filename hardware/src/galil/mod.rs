mod dmc;
pub mod mock;

pub use dmc::{
    ControllerErrorCode, DmcDevice, DmcError, DmcLink, DmcResult, DEFAULT_GANTRY_IP, DEFAULT_PORT,
    DEFAULT_SOCKET_TIMEOUT,
};
