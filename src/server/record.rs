use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Unique identifier of one launch of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchId(Uuid);

impl LaunchId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable identity of a spawned server process.
///
/// One record lives in the workspace while its process is (or may be)
/// alive. It is the only state that survives a manager restart, so every
/// stop and status path can fall back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub workspace: String,
    pub pid: u32,
    pub launch_id: LaunchId,
    pub started_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub(crate) fn new(workspace: &str, pid: u32) -> Self {
        Self {
            workspace: workspace.to_string(),
            pid,
            launch_id: LaunchId::new(),
            started_at: Utc::now(),
        }
    }

    /// Reads the record at `path`.
    ///
    /// Returns `Ok(None)` when no record exists and
    /// [`Error::RecordCorrupt`] when the file cannot be parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::RecordCorrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::RecordCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Writes the record to `path`, replacing any previous one atomically.
    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("Failed to serialize process record: {}", e)))?;

        let tmp = path.with_extension("pid.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Deletes the record at `path`. A missing file is not an error.
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
