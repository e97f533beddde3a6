//! Persisted gantry position.
//!
//! The last confirmed controller position is kept in a one-line text file of
//! five comma-separated step counts (`x,y,z,theta,phi`). The controller cannot
//! start without it, and every completed move or homing rewrites it.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::axis::StepPosition;

/// Default file name for the persisted position.
pub const DEFAULT_POSITION_FILE: &str = "galil_last_position.txt";

/// Errors reading or writing the persisted position.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record is missing, unreadable, or malformed.
    #[error("Position record {path} unavailable: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// The record could not be rewritten.
    #[error("Failed to write position record {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for position store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// File-backed store for the last confirmed step position.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted position.
    ///
    /// Fields may be written as decimals (`1000.0000`); they are rounded to
    /// whole steps.
    pub fn load(&self) -> StoreResult<StepPosition> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| self.unavailable(e))?;
        let line = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| self.unavailable("file is empty"))?;

        let position = Self::parse_record(line).map_err(|reason| self.unavailable(reason))?;
        debug!("Loaded position {} from {}", position, self.path.display());
        Ok(position)
    }

    /// Overwrite the persisted position.
    ///
    /// Writes a temporary file next to the record and renames it into place,
    /// so a crash mid-write leaves the previous record intact.
    pub fn save(&self, position: &StepPosition) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.write_failed(e))?;
        writeln!(file, "{}", position.to_command_fields()).map_err(|e| self.write_failed(e))?;
        file.as_file().sync_all().map_err(|e| self.write_failed(e))?;
        file.persist(&self.path).map_err(|e| self.write_failed(e.error))?;

        debug!("Saved position {} to {}", position, self.path.display());
        Ok(())
    }

    fn parse_record(line: &str) -> Result<StepPosition, String> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, found {}", fields.len()));
        }

        let mut steps = [0i64; 5];
        for (slot, field) in steps.iter_mut().zip(&fields) {
            let value: f64 = field
                .parse()
                .map_err(|_| format!("invalid step count {field:?}"))?;
            if !value.is_finite() {
                return Err(format!("invalid step count {field:?}"));
            }
            *slot = value.round() as i64;
        }
        Ok(StepPosition::from_array(steps))
    }

    fn unavailable(&self, reason: impl ToString) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn write_failed(&self, source: std::io::Error) -> StoreError {
        StoreError::WriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}
