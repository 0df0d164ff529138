//! Persisted container state.
//!
//! One `state.json` per container data directory, written by the parent
//! orchestrator just before the child is unblocked and removed when the
//! container exits. Join processes read it to find the init they attach to.

use std::io::Write;
use std::path::{Path, PathBuf};

use vessel_common::constants::STATE_FILE;
use vessel_common::error::{Result, VesselError};
use vessel_common::state::ContainerState;

fn state_path(data_path: &Path) -> PathBuf {
    data_path.join(STATE_FILE)
}

/// Persists `state` atomically to `<data_path>/state.json`.
///
/// The record is written to a temporary file in the same directory and
/// renamed over the target, so readers never observe a torn file.
///
/// # Errors
///
/// Returns [`VesselError::StateWrite`] if the directory or file cannot
/// be written.
pub fn save(data_path: &Path, state: &ContainerState) -> Result<()> {
    let path = state_path(data_path);
    let write_err = |message: String| VesselError::StateWrite {
        path: path.clone(),
        message,
    };

    std::fs::create_dir_all(data_path).map_err(|err| write_err(err.to_string()))?;
    let json = serde_json::to_vec_pretty(state).map_err(|err| write_err(err.to_string()))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(data_path).map_err(|err| write_err(err.to_string()))?;
    tmp.write_all(&json).map_err(|err| write_err(err.to_string()))?;
    tmp.persist(&path).map_err(|err| write_err(err.to_string()))?;

    tracing::debug!(path = %path.display(), init_pid = state.init_pid, "state saved");
    Ok(())
}

/// Loads the persisted state; `Ok(None)` means no container exists here.
///
/// # Errors
///
/// Returns [`VesselError::StateRead`] when the file exists but cannot be
/// read or parsed — corruption is never silently treated as absence.
pub fn load(data_path: &Path) -> Result<Option<ContainerState>> {
    let path = state_path(data_path);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(VesselError::StateRead {
                path,
                message: err.to_string(),
            })
        }
    };
    let state = serde_json::from_str(&content).map_err(|err| VesselError::StateRead {
        path,
        message: err.to_string(),
    })?;
    Ok(Some(state))
}

/// Removes the state file; a file that is already gone is fine.
///
/// # Errors
///
/// Returns [`VesselError::StateWrite`] on any other removal failure.
pub fn delete(data_path: &Path) -> Result<()> {
    let path = state_path(data_path);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "state deleted");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(VesselError::StateWrite {
            path,
            message: err.to_string(),
        }),
    }
}
