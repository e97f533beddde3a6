//! `gphoto2` invocation and output parsing.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, trace};

use super::{CameraError, CameraResult};

/// Program name used when no explicit path is given.
pub const DEFAULT_GPHOTO2: &str = "gphoto2";

/// Summary lines copied verbatim to the settings sidecar.
const SUMMARY_HEADER_LINES: usize = 5;

/// First summary line of the device property listing.
const PROPERTY_LISTING_START: usize = 17;

/// Runs `gphoto2` with a set of arguments.
///
/// Abstracts the process boundary so camera logic can run against the real
/// utility or the scripted [`MockGphoto`](super::mock::MockGphoto).
pub trait CameraCli {
    /// Run one invocation and return its standard output.
    ///
    /// A non-zero exit status must surface as [`CameraError::CommandFailed`].
    fn run(&mut self, args: &[&str]) -> CameraResult<String>;
}

/// [`CameraCli`] backed by the installed `gphoto2` binary.
#[derive(Debug, Clone)]
pub struct Gphoto2Cli {
    program: PathBuf,
}

impl Gphoto2Cli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Default for Gphoto2Cli {
    fn default() -> Self {
        Self::new(DEFAULT_GPHOTO2)
    }
}

impl CameraCli for Gphoto2Cli {
    fn run(&mut self, args: &[&str]) -> CameraResult<String> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| CameraError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!("{} stdout: {:?}", self.program.display(), stdout);

        if !output.status.success() {
            return Err(CameraError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// A camera listed by `gphoto2 --auto-detect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCamera {
    pub model: String,
    /// Port path such as `usb:001,004`
    pub port: String,
}

/// Parse the model/port table printed by `gphoto2 --auto-detect`.
///
/// ```
/// use rig_hardware::camera::parse_auto_detect;
///
/// let text = "Model                          Port\n\
///             ----------------------------------------------------------\n\
///             Canon EOS 2000D                usb:001,004\n";
/// let cameras = parse_auto_detect(text);
/// assert_eq!(cameras[0].model, "Canon EOS 2000D");
/// assert_eq!(cameras[0].port, "usb:001,004");
/// ```
pub fn parse_auto_detect(text: &str) -> Vec<DetectedCamera> {
    text.lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            let (model, port) = line.rsplit_once(char::is_whitespace)?;
            let model = model.trim();
            if model.is_empty() {
                return None;
            }
            Some(DetectedCamera {
                model: model.to_string(),
                port: port.to_string(),
            })
        })
        .collect()
}

/// Serial number from a `gphoto2 --summary` listing.
pub fn parse_serial_number(summary: &str) -> Option<String> {
    summary
        .lines()
        .find_map(|line| line.trim().strip_prefix("Serial Number:"))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

/// `Current:` value from a `gphoto2 --get-config` listing.
pub fn parse_current_value(config: &str) -> Option<String> {
    config
        .lines()
        .find_map(|line| line.trim().strip_prefix("Current:"))
        .map(|value| value.trim().to_string())
}

/// Condense a camera summary into the settings sidecar text.
///
/// Keeps the identification lines at the top of the summary, then one
/// `name, value: value` line per named device property. Generic unnamed
/// `Property 0x....` entries are dropped.
pub fn format_settings(summary: &str) -> String {
    let lines: Vec<&str> = summary
        .lines()
        .skip_while(|line| line.trim().is_empty() || line.trim() == "Camera summary:")
        .collect();

    let mut out = String::new();
    for line in lines.iter().take(SUMMARY_HEADER_LINES) {
        out.push_str(line);
        out.push('\n');
    }

    for line in lines.iter().skip(PROPERTY_LISTING_START) {
        let name = line
            .split('(')
            .next()
            .unwrap_or_default()
            .trim_matches(|c| ": ()".contains(c));
        if name.is_empty() || name.split(' ').next() == Some("Property") {
            continue;
        }
        let value = line
            .rsplit(' ')
            .next()
            .unwrap_or_default()
            .trim_matches(|c| " ()".contains(c));
        out.push_str(&format!("{name}, value: {value}\n"));
    }
    out
}
