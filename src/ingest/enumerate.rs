use anyhow::{anyhow, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extensions (lowercase, with leading dot) that are decoded and labeled.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

/// One file found in the input folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageEntry {
    pub path: PathBuf,
    /// Original file name as the OS reports it; names the archived copy.
    pub os_name: OsString,
    /// Display form of `os_name`, used as the item id.
    pub file_name: String,
    /// Lowercase extension with leading dot, or empty.
    pub ext: String,
}

impl ImageEntry {
    pub fn from_path(path: PathBuf) -> Result<Self> {
        let os_name = path
            .file_name()
            .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?
            .to_os_string();
        let file_name = os_name.to_string_lossy().into_owned();
        let ext = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Ok(Self {
            path,
            os_name,
            file_name,
            ext,
        })
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_EXTENSIONS.contains(&self.ext.as_str())
    }
}

/// List regular files directly under `dir`, sorted by name, split into
/// `(accepted, skipped)` by extension.
pub fn list_images(dir: &Path) -> Result<(Vec<ImageEntry>, Vec<ImageEntry>)> {
    let mut paths = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow!("failed to read input folder {}: {}", dir.display(), e))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    for path in paths {
        let entry = ImageEntry::from_path(path)?;
        if entry.is_supported() {
            accepted.push(entry);
        } else {
            skipped.push(entry);
        }
    }
    Ok((accepted, skipped))
}
