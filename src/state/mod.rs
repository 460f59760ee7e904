//! Snapshot persistence with atomic file writes.
//!
//! Strategies export their progress as serializable snapshots; this module
//! stores them so a restarted process resumes from the last committed phase
//! instead of guessing about open orders and position.
//!
//! # Safety
//! - Uses atomic file writes (write to temp, fsync, rename) for durability
//! - A crash mid-save leaves either the old or the new snapshot, never a
//!   partial file

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// JSON snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored snapshot. A missing file is `Ok(None)`; a corrupt
    /// one is an error rather than a silent fresh start.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StateError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Persist `value` atomically.
    ///
    /// 1. Write to a temporary file next to the target
    /// 2. Sync to disk (fsync)
    /// 3. Rename over the target (atomic on the same filesystem)
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(value)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::dca::{DcaSnapshot, Phase, Position, TakeProfitProgress};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        assert!(store.load::<DcaSnapshot>().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let snapshot = DcaSnapshot {
            phase: Phase::TakeProfitReady,
            budget: dec!(1012.5),
            position: Position {
                base: dec!(0.5),
                quote: dec!(-49.5),
            },
            next_round_at: Utc::now(),
            round: 7,
            take_profit: TakeProfitProgress {
                filled_quantity: Some(dec!(0.5)),
                traded_quantity: dec!(0.2),
            },
        };

        store.save(&snapshot).unwrap();
        assert_eq!(store.load::<DcaSnapshot>().unwrap(), Some(snapshot));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SnapshotStore::new(path);
        assert!(matches!(store.load::<DcaSnapshot>(), Err(StateError::Serde(_))));
    }
}
