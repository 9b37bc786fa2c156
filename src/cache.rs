//! Last-seen track, persisted so a fresh start can show something before the
//! first metadata fetch completes.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTrack {
    pub title: String,
    pub artist: String,
    /// Unix seconds of the last write.
    #[serde(default)]
    pub updated: u64,
}

#[derive(Debug, Clone)]
pub struct MetadataCache {
    path: PathBuf,
}

impl MetadataCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been cached yet.
    pub fn load(&self) -> anyhow::Result<Option<CachedTrack>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read cache: {}", self.path.display()))
            }
        };
        let track = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse cache: {}", self.path.display()))?;
        Ok(Some(track))
    }

    pub fn store(&self, title: &str, artist: &str) -> anyhow::Result<()> {
        let updated = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let track = CachedTrack {
            title: title.to_string(),
            artist: artist.to_string(),
            updated,
        };
        let json = serde_json::to_string_pretty(&track)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write cache: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace cache: {}", self.path.display()))?;
        trace!(path = %self.path.display(), "cache updated");
        Ok(())
    }
}
