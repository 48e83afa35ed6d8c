use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::estimates::ChannelStatistics;
use super::source::FileSignature;
use crate::error::{IntegraError, Result};

/// One cached frame: its identity on disk and per-channel statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ns: u64,
    pub channels: Vec<ChannelStatistics>,
}

impl CacheItem {
    fn signature(&self) -> FileSignature {
        FileSignature {
            size: self.size,
            modified_ns: self.modified_ns,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    items: Vec<CacheItem>,
}

/// Persistent per-file statistics keyed by canonical path.
///
/// Entries are valid only while the file's size and modification time match.
/// Lookups are read-through, inserts write-through to memory; `save` flushes
/// to disk.
#[derive(Debug, Default)]
pub struct StatisticsCache {
    path: Option<PathBuf>,
    items: HashMap<PathBuf, CacheItem>,
    dirty: bool,
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl StatisticsCache {
    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`. A missing or unreadable file yields an
    /// empty cache that will be written on `save`.
    pub fn open(path: &Path) -> Self {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no statistics cache loaded");
                return cache;
            }
        };
        match toml::from_str::<CacheFile>(&text) {
            Ok(file) => {
                cache.items = file.items.into_iter().map(|item| (item.path.clone(), item)).collect();
                debug!(path = %path.display(), items = cache.items.len(), "statistics cache loaded");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring invalid statistics cache"),
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cached statistics for `path`, if present and still current.
    pub fn get(&self, path: &Path, signature: FileSignature) -> Option<&[ChannelStatistics]> {
        let item = self.items.get(&canonical(path))?;
        (item.signature() == signature).then_some(item.channels.as_slice())
    }

    pub fn insert(&mut self, path: &Path, signature: FileSignature, channels: Vec<ChannelStatistics>) {
        let path = canonical(path);
        self.items.insert(
            path.clone(),
            CacheItem {
                path,
                size: signature.size,
                modified_ns: signature.modified_ns,
                channels,
            },
        );
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.dirty |= !self.items.is_empty();
        self.items.clear();
    }

    /// Write the cache back to its file when it has changed.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let mut items: Vec<CacheItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        let text = toml::to_string(&CacheFile { items })
            .map_err(|e| IntegraError::Cache(format!("{}: {e}", path.display())))?;
        std::fs::write(path, text)?;
        self.dirty = false;
        debug!(path = %path.display(), items = self.items.len(), "statistics cache saved");
        Ok(())
    }
}
