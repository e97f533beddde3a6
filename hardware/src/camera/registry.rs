//! Serial number to camera index map.
//!
//! The map file holds one `index serial` pair per line. USB ports are not
//! stored; they are rediscovered on every start.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::{CameraError, CameraResult};

/// Default name of the camera map file.
pub const DEFAULT_CAMERA_MAP: &str = "pgcamera_cameras.txt";

/// Stable camera indices keyed by serial number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraMap {
    by_index: BTreeMap<usize, String>,
}

impl CameraMap {
    /// Assign indices 0.. to the serial numbers in sorted order.
    pub fn from_serials<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut serials: Vec<String> = serials.into_iter().map(Into::into).collect();
        serials.sort();
        serials.dedup();
        Self {
            by_index: serials.into_iter().enumerate().collect(),
        }
    }

    pub fn load(path: &Path) -> CameraResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut by_index = BTreeMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: &str| CameraError::MapFormat {
                path: path.to_path_buf(),
                line: number + 1,
                reason: reason.to_string(),
            };

            let (index, serial) = line
                .split_once(' ')
                .ok_or_else(|| malformed("expected `index serial`"))?;
            let index: usize = index
                .parse()
                .map_err(|_| malformed("camera index is not a number"))?;
            let serial = serial.trim();
            if serial.is_empty() {
                return Err(malformed("missing serial number"));
            }
            if by_index.insert(index, serial.to_string()).is_some() {
                return Err(malformed("duplicate camera index"));
            }
        }

        debug!("Loaded {} cameras from {}", by_index.len(), path.display());
        Ok(Self { by_index })
    }

    pub fn save(&self, path: &Path) -> CameraResult<()> {
        let text: String = self
            .by_index
            .iter()
            .map(|(index, serial)| format!("{index} {serial}\n"))
            .collect();
        std::fs::write(path, text)?;
        debug!("Wrote {} cameras to {}", self.by_index.len(), path.display());
        Ok(())
    }

    pub fn index_of(&self, serial: &str) -> Option<usize> {
        self.by_index
            .iter()
            .find_map(|(&index, s)| (s == serial).then_some(index))
    }

    pub fn serial_of(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    /// `(index, serial)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.by_index
            .iter()
            .map(|(&index, serial)| (index, serial.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}
