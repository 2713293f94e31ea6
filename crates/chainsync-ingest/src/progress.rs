//! Per-file resumption state
//!
//! State for `blocks/2024-01-01/part-0.parquet` lives next to it in
//! `part-0.parquet.status.json`. Writes go to a `.tmp` sibling first and are
//! renamed into place, so a crash mid-write leaves the previous state intact.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const STATUS_SUFFIX: &str = ".status.json";

/// How far ingestion of one file has progressed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionState {
    /// Total rows in the file, from its footer
    #[serde(default)]
    pub num_rows: u64,

    /// Rows committed to the store, counted from the start of the file
    #[serde(default)]
    pub last_row: u64,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResumptionState {
    pub fn is_complete(&self) -> bool {
        self.num_rows > 0 && self.last_row >= self.num_rows
    }
}

/// Location of the state file for a source file
pub fn status_path_for(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(STATUS_SUFFIX);
    PathBuf::from(name)
}

/// Reads and writes [`ResumptionState`] records alongside their source files
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressStore;

impl ProgressStore {
    /// Load the state for `file`. A missing state file is a fresh start, not
    /// an error.
    pub fn load(&self, file: &Path) -> Result<ResumptionState> {
        let path = status_path_for(file);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ResumptionState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stamp `state` with the current time and persist it atomically
    pub fn save(&self, file: &Path, state: &mut ResumptionState) -> Result<()> {
        state.updated_at = Some(Utc::now());

        let path = status_path_for(file);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let data = serde_json::to_vec_pretty(state)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        // contents must be on disk before the rename makes them visible
        let mut out = fs::File::create(&tmp)?;
        out.write_all(&data)?;
        out.sync_all()?;
        drop(out);

        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
