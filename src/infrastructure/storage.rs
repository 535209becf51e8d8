use crate::domain::error::{AppError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn io_err(msg: impl Into<String>) -> AppError {
    AppError::IoError(msg.into())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| io_err(format!("Failed to create dir {}: {e}", path.display())))?;
    }
    Ok(())
}

/// Working directories the service writes into. Created on startup.
pub fn ensure_data_dirs(dirs: &[&Path]) -> Result<()> {
    for dir in dirs {
        ensure_dir(dir)?;
    }
    Ok(())
}

/// Writes through a sibling temp file so readers never see a partial file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = temp_sibling(path, "tmp");
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| {
            io_err(format!(
                "Failed to create temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        file.write_all(bytes).map_err(|e| {
            io_err(format!(
                "Failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        file.sync_all().ok();
    }

    // Rename cannot replace an existing file on Windows; move the old one away first.
    if path.exists() {
        let backup = temp_sibling(path, "bak");
        fs::rename(path, &backup).map_err(|e| {
            io_err(format!(
                "Failed to move existing file {} to {}: {e}",
                path.display(),
                backup.display()
            ))
        })?;
        fs::rename(&tmp_path, path).map_err(|e| {
            io_err(format!(
                "Failed to rename temp file {} to {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;
        let _ = fs::remove_file(&backup);
    } else {
        fs::rename(&tmp_path, path).map_err(|e| {
            io_err(format!(
                "Failed to rename temp file {} to {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;
    }
    Ok(())
}

/// `name.ext` -> `name.ext.<kind>-<uuid>`, keeping the original extension visible.
fn temp_sibling(path: &Path, kind: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}-{}", file_name, kind, Uuid::new_v4()))
}

/// True for leftovers of [`atomic_write_bytes`].
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.contains(".tmp-") || file_name.contains(".bak-")
}
