//! Key/value blob storage on disk, one JSON file per key.
//!
//! A version marker is kept beside the blobs. When it does not match the
//! version the client was built for, every cache blob is deleted so the next
//! sync starts from the server's state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

/// Prefix shared by every cache key; wiped together on a version change.
pub const CACHE_PREFIX: &str = "srs-v6";
/// Key of the version marker.
pub const VERSION_KEY: &str = "flashcards-cache-version";

pub fn state_key(profile: &str) -> String {
    format!("{CACHE_PREFIX}:state:{profile}")
}

pub fn registry_key(profile: &str) -> String {
    format!("{CACHE_PREFIX}:registry:{profile}")
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    /// Open storage in `dir` and enforce the cache version.
    ///
    /// Returns the storage and whether the cache was wiped.
    pub fn open(dir: &Path, version: &str) -> Result<(Self, bool)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data dir: {}", dir.display()))?;
        let storage = Self {
            dir: dir.to_path_buf(),
        };

        let stored: Option<String> = storage.get(VERSION_KEY)?;
        let wiped = stored.as_deref() != Some(version);
        if wiped {
            let removed = storage.wipe_cache()?;
            if stored.is_some() || removed > 0 {
                info!(
                    from = stored.as_deref().unwrap_or("none"),
                    to = version,
                    removed,
                    "cache version changed, wiped local blobs"
                );
            }
            storage.put(VERSION_KEY, &version)?;
        }
        Ok((storage, wiped))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    /// Read a blob. A corrupt blob is logged and treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable blob");
                Ok(None)
            }
        }
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string(value)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Delete every cache blob. Returns how many files were removed.
    pub fn wipe_cache(&self) -> Result<usize> {
        let prefix = file_stem(CACHE_PREFIX);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
        {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
