// src/restore.rs

//! Durable record of the task ids believed to be live.
//!
//! The runner rewrites `<baseTaskDir>/restore.json` on every membership
//! change of its work-item table (except while stopping, so the roster
//! survives for the next startup). Losing a write is tolerable: the next
//! successful save supersedes it, and a malformed file on startup is treated
//! as an empty roster rather than a fatal error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub const TASK_RESTORE_FILENAME: &str = "restore.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRestoreInfo {
    running_tasks: Vec<String>,
}

/// Handle on the restore file.
#[derive(Debug)]
pub struct RestoreList {
    path: PathBuf,
}

impl RestoreList {
    pub fn new(base_task_dir: &Path) -> Self {
        Self {
            path: base_task_dir.join(TASK_RESTORE_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the roster. A missing file is an empty roster; a file that fails
    /// to decode is logged and also treated as empty so startup proceeds.
    pub fn load(&self) -> Vec<String> {
        if !self.path.exists() {
            return Vec::new();
        }

        let decoded = fs::read(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| {
                serde_json::from_slice::<TaskRestoreInfo>(&bytes).map_err(anyhow::Error::from)
            });

        match decoded {
            Ok(info) => info.running_tasks,
            Err(err) => {
                error!(
                    file = %self.path.display(),
                    error = %err,
                    "failed to read restorable tasks; skipping restore"
                );
                Vec::new()
            }
        }
    }

    /// Overwrite the roster. Errors are logged and swallowed.
    pub fn save(&self, task_ids: &[String]) {
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let info = TaskRestoreInfo {
                running_tasks: task_ids.to_vec(),
            };
            fs::write(&self.path, serde_json::to_vec(&info)?)?;
            Ok(())
        })();

        if let Err(err) = result {
            warn!(
                file = %self.path.display(),
                error = %err,
                "failed to save tasks to restore file; skipping this save"
            );
        }
    }
}
