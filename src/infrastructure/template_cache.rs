use crate::domain::error::{AppError, Result};
use crate::infrastructure::storage::{atomic_write_bytes, ensure_dir, is_temp_artifact};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Flat directory of downloaded templates. Entries never expire; only
/// [`TemplateCache::clear`] removes them.
#[derive(Debug, Clone)]
pub struct TemplateCache {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedTemplate {
    pub file_name: String,
    pub path: PathBuf,
}

impl TemplateCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached file names in sorted order. A missing directory is an empty cache.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !is_temp_artifact(name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// First file whose name contains any of `needles` (case-insensitive).
    pub fn find(&self, needles: &[&str]) -> Result<Option<CachedTemplate>> {
        let needles: Vec<String> = needles
            .iter()
            .map(|needle| needle.trim().to_lowercase())
            .filter(|needle| !needle.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(None);
        }

        let hit = self.list()?.into_iter().find(|name| {
            let lowered = name.to_lowercase();
            needles.iter().any(|needle| lowered.contains(needle.as_str()))
        });
        Ok(hit.map(|file_name| CachedTemplate {
            path: self.dir.join(&file_name),
            file_name,
        }))
    }

    pub fn read(&self, cached: &CachedTemplate) -> Result<Vec<u8>> {
        fs::read(&cached.path).map_err(|e| {
            AppError::IoError(format!("Failed to read {}: {}", cached.path.display(), e))
        })
    }

    /// Stores `bytes` as `<key>_<file name>` so later lookups by id or
    /// `type-language` find it. Rewrites of the same key are idempotent.
    pub fn store(&self, key: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let base_name = Path::new(file_name)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AppError::ValidationError(format!("Invalid cache file name: {}", file_name))
            })?;
        let cached_name = if base_name.to_lowercase().contains(&key.to_lowercase()) {
            base_name
        } else {
            format!("{}_{}", key, base_name)
        };

        let path = self.dir.join(&cached_name);
        atomic_write_bytes(&path, bytes)?;
        info!(file = %cached_name, size = bytes.len(), "Cached template");
        Ok(path)
    }

    /// Deletes the whole cache directory. Returns how many files were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.list()?.len();
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| {
                warn!(dir = %self.dir.display(), error = %e, "Failed to clear template cache");
                AppError::IoError(format!("Failed to clear {}: {}", self.dir.display(), e))
            })?;
        }
        ensure_dir(&self.dir)?;
        info!(removed, "Template cache cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_id_or_composite_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new(dir.path());
        cache.store("protocol-hu", "b.xlsx", b"b").unwrap();
        cache.store("protocol-hu", "a.xlsx", b"a").unwrap();
        cache.store("tpl-42", "x.xlsx", b"x").unwrap();

        let hit = cache.find(&["missing-id", "protocol-hu"]).unwrap().unwrap();
        assert_eq!(hit.file_name, "protocol-hu_a.xlsx");
        assert_eq!(cache.read(&hit).unwrap(), b"a");

        let hit = cache.find(&["TPL-42"]).unwrap().unwrap();
        assert_eq!(hit.file_name, "tpl-42_x.xlsx");
        assert!(cache.find(&["protocol-de"]).unwrap().is_none());
    }

    #[test]
    fn test_store_keeps_names_that_already_carry_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new(dir.path());
        let path = cache.store("protocol-de", "remote/protocol-de.xlsx", b"1").unwrap();
        assert_eq!(path.file_name().unwrap(), "protocol-de.xlsx");
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new(dir.path().join("cache"));
        assert_eq!(cache.list().unwrap().len(), 0);
        cache.store("k", "one.xlsx", b"1").unwrap();
        cache.store("k", "two.xlsx", b"2").unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.list().unwrap().is_empty());
        assert!(cache.dir().exists());
    }
}
