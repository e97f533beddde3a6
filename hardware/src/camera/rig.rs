//! The set of cameras attached to the rig.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use super::gphoto::{
    format_settings, parse_auto_detect, parse_current_value, parse_serial_number, CameraCli,
};
use super::registry::CameraMap;
use super::{CameraError, CameraResult};

/// Capture target that keeps images off the memory card.
pub const CAPTURE_TARGET_RAM: &str = "Internal RAM";

/// Timestamp appended to capture file names, local time with its UTC offset (`+hhmm`).
const CAPTURE_DATE_FORMAT: &str = "%Y%m%d-%H:%M:%S%z";

/// A connected camera with its assigned index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraVitals {
    pub serial: String,
    pub index: usize,
    pub port: String,
    pub model: String,
}

/// Files written by one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub camera: usize,
    pub image: PathBuf,
    /// Settings sidecar written next to the image
    pub settings: PathBuf,
}

/// Cameras discovered on the USB bus, matched against the camera map.
pub struct CameraRig<C: CameraCli> {
    cli: C,
    map: CameraMap,
    /// Sorted by index, never empty
    cameras: Vec<CameraVitals>,
    selected: usize,
}

impl<C: CameraCli> CameraRig<C> {
    /// Detect attached cameras and assign their indices.
    ///
    /// With `rebuild_map`, every detected camera is numbered in serial order
    /// and the map file is overwritten. Otherwise the map file is read and
    /// cameras missing from it are ignored. The lowest-numbered camera is
    /// selected.
    pub fn open(mut cli: C, map_path: &Path, rebuild_map: bool) -> CameraResult<Self> {
        let detected = parse_auto_detect(&cli.run(&["--auto-detect"])?);
        info!("Detected {} cameras", detected.len());

        let mut found = Vec::with_capacity(detected.len());
        for camera in detected {
            let summary = cli.run(&["--port", &camera.port, "--summary"])?;
            let serial = parse_serial_number(&summary).ok_or_else(|| CameraError::MissingSerial {
                port: camera.port.clone(),
            })?;
            found.push((serial, camera));
        }

        let map = if rebuild_map {
            let map = CameraMap::from_serials(found.iter().map(|(serial, _)| serial.as_str()));
            map.save(map_path)?;
            info!("Rebuilt camera map {}", map_path.display());
            map
        } else {
            CameraMap::load(map_path)?
        };

        let mut cameras = Vec::with_capacity(found.len());
        for (serial, camera) in found {
            match map.index_of(&serial) {
                Some(index) => cameras.push(CameraVitals {
                    serial,
                    index,
                    port: camera.port,
                    model: camera.model,
                }),
                None => warn!(
                    "Camera {} on {} is not in {}, ignoring it",
                    serial,
                    camera.port,
                    map_path.display()
                ),
            }
        }
        cameras.sort_by_key(|c| c.index);

        if cameras.is_empty() {
            return Err(CameraError::NoCameras);
        }
        for camera in &cameras {
            info!(
                "Camera {}: serial {} on {} ({})",
                camera.index, camera.serial, camera.port, camera.model
            );
        }

        Ok(Self {
            cli,
            map,
            cameras,
            selected: 0,
        })
    }

    /// Connected cameras in index order.
    pub fn cameras(&self) -> &[CameraVitals] {
        &self.cameras
    }

    pub fn map(&self) -> &CameraMap {
        &self.map
    }

    /// Make `index` the camera used by [`capture_image`](Self::capture_image).
    pub fn select(&mut self, index: usize) -> CameraResult<()> {
        self.selected = self
            .cameras
            .iter()
            .position(|c| c.index == index)
            .ok_or(CameraError::UnknownCamera(index))?;
        info!("Camera set to number {}", index);
        Ok(())
    }

    pub fn selected(&self) -> &CameraVitals {
        &self.cameras[self.selected]
    }

    pub fn port_of(&self, index: usize) -> Option<&str> {
        self.cameras
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.port.as_str())
    }

    /// Camera index keyed by USB bus/device (`usb:001,004` becomes `001/004`).
    pub fn usb_ports(&self) -> BTreeMap<String, usize> {
        self.cameras
            .iter()
            .map(|c| {
                let port = c.port.strip_prefix("usb:").unwrap_or(&c.port);
                (port.replace(',', "/"), c.index)
            })
            .collect()
    }

    /// Filtered settings of the selected camera, as written to capture sidecars.
    pub fn settings_summary(&mut self) -> CameraResult<String> {
        let port = self.selected().port.clone();
        let summary = self.cli.run(&["--port", &port, "--summary"])?;
        Ok(format_settings(&summary))
    }

    /// Take a photo with the selected camera.
    ///
    /// Writes `<dir>/c<index>_<label>[<timestamp>].jpg` and a `.txt` settings
    /// sidecar with the same stem. The camera's capture target is switched to
    /// internal RAM for the shot and restored afterwards, even if the capture
    /// fails.
    pub fn capture_image(
        &mut self,
        dir: &Path,
        label: &str,
        append_date: bool,
    ) -> CameraResult<CapturedImage> {
        let camera = self.selected().clone();

        let mut stem = format!("c{}_{}", camera.index, label);
        if append_date {
            stem.push_str(&Local::now().format(CAPTURE_DATE_FORMAT).to_string());
        }
        let image = dir.join(format!("{stem}.jpg"));
        let settings = dir.join(format!("{stem}.txt"));

        let config = self
            .cli
            .run(&["--port", &camera.port, "--get-config", "capturetarget"])?;
        let previous_target = parse_current_value(&config).ok_or_else(|| {
            CameraError::InvalidOutput(format!("no current capturetarget for {}", camera.port))
        })?;
        self.set_capture_target(&camera.port, CAPTURE_TARGET_RAM)?;

        info!("Capturing {} with camera {}", image.display(), camera.index);
        let captured = self.shoot(&camera.port, &image, &settings);
        let restored = self.set_capture_target(&camera.port, &previous_target);
        captured?;
        restored?;

        info!("Settings saved to {}", settings.display());
        Ok(CapturedImage {
            camera: camera.index,
            image,
            settings,
        })
    }

    /// Capture on every camera in index order, then reselect the original camera.
    pub fn capture_all(
        &mut self,
        dir: &Path,
        label: &str,
        append_date: bool,
    ) -> CameraResult<Vec<CapturedImage>> {
        let original = self.selected;
        let mut images = Vec::with_capacity(self.cameras.len());
        for position in 0..self.cameras.len() {
            self.selected = position;
            match self.capture_image(dir, label, append_date) {
                Ok(image) => images.push(image),
                Err(e) => {
                    self.selected = original;
                    return Err(e);
                }
            }
        }
        self.selected = original;
        Ok(images)
    }

    fn shoot(&mut self, port: &str, image: &Path, settings: &Path) -> CameraResult<()> {
        let port_arg = format!("--port={port}");
        let filename_arg = format!("--filename={}", image.display());
        self.cli.run(&[
            "--wait-event=7s",
            "--capture-image-and-download",
            &port_arg,
            &filename_arg,
        ])?;

        let summary = self.cli.run(&["--port", port, "--summary"])?;
        std::fs::write(settings, format_settings(&summary))?;
        Ok(())
    }

    fn set_capture_target(&mut self, port: &str, target: &str) -> CameraResult<()> {
        let value = format!("capturetarget={target}");
        self.cli.run(&["--port", port, "--set-config-value", &value])?;
        Ok(())
    }
}
