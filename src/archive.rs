//! Intake directory scanning and archiving of processed workbooks.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Files in `dir` matching `pattern`, sorted by path.
pub fn find_intake_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&full)
        .with_context(|| format!("Invalid file pattern {}", full))?
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping unreadable intake entry: {}", e);
                None
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Move a processed file into `archive_dir`. Returns the new location.
///
/// Falls back to copy + remove when a rename isn't possible (e.g. another
/// filesystem). A missing file is logged and yields `None`.
pub fn archive_file(path: &Path, archive_dir: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        warn!("File {} not found, nothing to archive", path.display());
        return Ok(None);
    }
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;

    std::fs::create_dir_all(archive_dir)
        .with_context(|| format!("Failed to create archive directory {:?}", archive_dir))?;
    let dest = archive_dir.join(file_name);

    if std::fs::rename(path, &dest).is_err() {
        std::fs::copy(path, &dest)
            .with_context(|| format!("Failed to copy {} to {}", path.display(), dest.display()))?;
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    info!("File {} moved to {}", path.display(), dest.display());
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_intake_files_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Monthly_Bulletin_Oct.xlsx", "Monthly_Bulletin_Aug.xlsx", "notes.xlsx", "Monthly_Bulletin_Aug.csv"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("Monthly_Bulletin_dir.xlsx")).unwrap();

        let files = find_intake_files(dir.path(), "Monthly_Bulletin_*.xlsx").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Monthly_Bulletin_Aug.xlsx", "Monthly_Bulletin_Oct.xlsx"]);
    }

    #[test]
    fn test_archive_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Monthly_Bulletin_Oct.xlsx");
        std::fs::write(&file, b"workbook").unwrap();
        let archive = dir.path().join("Archive");

        let moved = archive_file(&file, &archive).unwrap().unwrap();
        assert_eq!(moved, archive.join("Monthly_Bulletin_Oct.xlsx"));
        assert!(!file.exists());
        assert_eq!(std::fs::read(&moved).unwrap(), b"workbook");
    }

    #[test]
    fn test_archive_missing_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = archive_file(&dir.path().join("gone.xlsx"), &dir.path().join("Archive")).unwrap();
        assert!(result.is_none());
    }
}
