//! Scripted stand-in for the `gphoto2` utility.
//!
//! [`MockGphoto`] answers the invocations used by [`CameraRig`](super::CameraRig)
//! for a configurable set of cameras and writes placeholder image files on
//! capture. Clones share state so tests can inspect what a rig did.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::gphoto::CameraCli;
use super::{CameraError, CameraResult};

/// Capture target a simulated camera starts with.
pub const DEFAULT_CAPTURE_TARGET: &str = "Memory card";

/// Bytes written as the captured image.
pub const PLACEHOLDER_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

#[derive(Debug, Clone)]
struct MockCamera {
    model: String,
    serial: String,
    capture_target: String,
}

/// One simulated capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCapture {
    pub port: String,
    pub filename: String,
    /// Capture target the camera was set to when it fired
    pub capture_target: String,
}

#[derive(Debug, Default)]
struct MockState {
    cameras: BTreeMap<String, MockCamera>,
    captures: Vec<MockCapture>,
    failures: Vec<String>,
    log: Vec<String>,
}

/// Simulated `gphoto2` implementing [`CameraCli`].
#[derive(Debug, Clone, Default)]
pub struct MockGphoto {
    state: Arc<Mutex<MockState>>,
}

impl MockGphoto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a camera on `port` (e.g. `usb:001,004`).
    pub fn with_camera(self, model: &str, port: &str, serial: &str) -> Self {
        self.state().cameras.insert(
            port.to_string(),
            MockCamera {
                model: model.to_string(),
                serial: serial.to_string(),
                capture_target: DEFAULT_CAPTURE_TARGET.to_string(),
            },
        );
        self
    }

    /// Fail the next invocation whose arguments contain `pattern`.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.state().failures.push(pattern.to_string());
        self
    }

    /// Every invocation so far, arguments joined with spaces.
    pub fn invocations(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn captures(&self) -> Vec<MockCapture> {
        self.state().captures.clone()
    }

    pub fn capture_target(&self, port: &str) -> Option<String> {
        self.state()
            .cameras
            .get(port)
            .map(|c| c.capture_target.clone())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CameraCli for MockGphoto {
    fn run(&mut self, args: &[&str]) -> CameraResult<String> {
        let mut state = self.state();
        let command = args.join(" ");
        state.log.push(command.clone());

        if let Some(index) = state.failures.iter().position(|p| command.contains(p.as_str())) {
            state.failures.remove(index);
            return Err(failed(&command, "*** Error: injected failure ***"));
        }

        match args {
            ["--auto-detect"] => Ok(state.auto_detect()),
            ["--port", port, "--summary"] => {
                let camera = state.camera(&command, port)?;
                Ok(summary(&camera.model, &camera.serial))
            }
            ["--port", port, "--get-config", "capturetarget"] => {
                let camera = state.camera(&command, port)?;
                Ok(format!(
                    "Label: Capture Target\nReadonly: 0\nType: RADIO\nCurrent: {}\nChoice: 0 Internal RAM\nChoice: 1 Memory card\nEND\n",
                    camera.capture_target
                ))
            }
            ["--port", port, "--set-config-value", setting] => {
                let target = setting
                    .strip_prefix("capturetarget=")
                    .ok_or_else(|| failed(&command, "unknown config entry"))?
                    .to_string();
                state.camera(&command, port)?;
                if let Some(camera) = state.cameras.get_mut(*port) {
                    camera.capture_target = target;
                }
                Ok(String::new())
            }
            ["--wait-event=7s", "--capture-image-and-download", port, filename] => {
                let port = port.strip_prefix("--port=").unwrap_or(*port);
                let filename = filename.strip_prefix("--filename=").unwrap_or(*filename);
                let camera = state.camera(&command, port)?;
                std::fs::write(filename, PLACEHOLDER_JPEG)?;
                state.captures.push(MockCapture {
                    port: port.to_string(),
                    filename: filename.to_string(),
                    capture_target: camera.capture_target,
                });
                Ok(format!("Saving file as {filename}\n"))
            }
            _ => Err(failed(&command, "unsupported invocation")),
        }
    }
}

impl MockState {
    fn auto_detect(&self) -> String {
        let mut out = format!("{:<31}{}\n{}\n", "Model", "Port", "-".repeat(58));
        for (port, camera) in &self.cameras {
            out.push_str(&format!("{:<31}{}\n", camera.model, port));
        }
        out
    }

    fn camera(&self, command: &str, port: &str) -> CameraResult<MockCamera> {
        self.cameras
            .get(port)
            .cloned()
            .ok_or_else(|| failed(command, "Could not find the requested device"))
    }
}

fn failed(command: &str, stderr: &str) -> CameraError {
    CameraError::CommandFailed {
        command: format!("gphoto2 {command}"),
        stderr: stderr.to_string(),
    }
}

/// Summary in the layout `gphoto2 --summary` prints for a Canon body.
fn summary(model: &str, serial: &str) -> String {
    format!(
        "Camera summary:
Manufacturer: Canon Inc.
Model: {model}
  Version: 3-1.0.0
  Serial Number: {serial}
Vendor Extension ID: 0xb (1.0)
Vendor Extension Description:

Capture Formats: JPEG
Display Formats: Association/Directory, Script, DPOF, MS AVI, MS Wave, JPEG

Device Capabilities:
\tFile Download, File Deletion, File Upload
\tGeneric Image Capture, No Open Capture, Canon EOS Capture, Canon EOS Capture 2
\tNo vendor specific capture

Storage Devices Summary:
Device Property Summary:
Property 0xd402:(read only) (type=0xffff) '{model}'
Battery Level(0x5001):(read only) (type=0x2) Enumeration [100,0,75,0,50] value: 100% (100)
ISO Speed(0x500f):(readwrite) (type=0x4) Enumeration [100,200,400,800] value: ISO 400 (400)
Property 0xd407:(read only) (type=0x6) 1
Exposure Time(0x500d):(readwrite) (type=0x6) Enumeration [1,2,166] value: 1/60 (166)
"
    )
}
