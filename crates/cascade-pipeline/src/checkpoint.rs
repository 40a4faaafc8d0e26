//! Checkpoint manifests written alongside partial exports.
//!
//! Every time the event iterator crosses a sub-bunch boundary with partial
//! export enabled it persists a [`CheckpointManifest`] naming the result
//! document it just wrote. After a crash, [`load_manifest`] tells which
//! partial output is complete; anything written after it is untrustworthy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cascade_types::Result;

const MANIFEST_FILE: &str = "checkpoint.json";

/// Record of one completed partial export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub run_id: String,
    /// Units completed when the export was taken.
    pub unit: u64,
    pub bunch: usize,
    pub sub_bunch: usize,
    /// Result path the partial groups were exported to.
    pub path: String,
    /// Names of the groups in that document.
    pub groups: Vec<String>,
    /// RFC 3339 timestamp of when the checkpoint was created.
    pub timestamp: String,
}

impl CheckpointManifest {
    pub fn new(
        run_id: impl Into<String>,
        unit: u64,
        bunch: usize,
        sub_bunch: usize,
        path: impl Into<String>,
        groups: Vec<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            unit,
            bunch,
            sub_bunch,
            path: path.into(),
            groups,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Save a manifest to `<dir>/checkpoint.json`, creating `dir` if needed.
/// Later manifests overwrite earlier ones.
pub fn save_manifest(manifest: &CheckpointManifest, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&path, json)?;
    tracing::debug!(path = %path.display(), unit = manifest.unit, "Checkpoint saved");
    Ok(path)
}

/// Load the latest manifest. `Ok(None)` when none was ever written.
pub fn load_manifest(dir: &Path) -> Result<Option<CheckpointManifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Delete the manifest, e.g. before starting a fresh run in the same directory.
pub fn clear_manifest(dir: &Path) -> Result<()> {
    let path = dir.join(MANIFEST_FILE);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}
