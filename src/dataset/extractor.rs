//! Gzip-compressed tar extraction

use flate2::read::GzDecoder;
use log::{debug, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

use crate::dataset::config::PathPolicy;
use crate::errors::{KitError, KitResult};

/// Unpacks `.tar.gz` archives held in memory
pub struct ArchiveExtractor {
    policy: PathPolicy,
}

impl ArchiveExtractor {
    pub fn new(policy: PathPolicy) -> Self {
        ArchiveExtractor { policy }
    }

    /// Extract every entry of the archive under `dest`
    ///
    /// # Arguments
    /// * `archive` - Gzip-compressed tar bytes
    /// * `dest` - Directory receiving the entries
    ///
    /// # Returns
    /// The first path component of the first entry, taken to be the
    /// archive's top-level directory
    pub fn extract(&self, archive: &[u8], dest: &Path) -> KitResult<String> {
        fs::create_dir_all(dest)?;

        let decoder = GzDecoder::new(archive);
        let mut tar = Archive::new(decoder);
        let entries = tar
            .entries()
            .map_err(|e| KitError::ArchiveError(format!("Cannot read archive: {}", e)))?;

        let mut top_level = None;
        let mut count = 0usize;
        for entry in entries {
            let mut entry = entry.map_err(|e| KitError::ArchiveError(format!("Corrupt archive entry: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| KitError::ArchiveError(format!("Invalid entry path: {}", e)))?
                .into_owned();
            debug!("Extracting {}", path.display());

            if top_level.is_none() {
                top_level = Some(top_level_name(&path)?);
            }

            match self.policy {
                PathPolicy::Strict => {
                    validate_entry_path(&path)?;
                    let unpacked = entry
                        .unpack_in(dest)
                        .map_err(|e| KitError::ArchiveError(format!("Failed to extract {}: {}", path.display(), e)))?;
                    if !unpacked {
                        warn!("Skipped archive entry {}", path.display());
                    }
                },
                PathPolicy::Trust => {
                    let target = dest.join(&path);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    entry
                        .unpack(&target)
                        .map_err(|e| KitError::ArchiveError(format!("Failed to extract {}: {}", path.display(), e)))?;
                }
            }
            count += 1;
        }

        let top_level = top_level.ok_or_else(|| KitError::ArchiveError("Archive contains no entries".to_string()))?;
        info!("Extracted {} entries into {}", count, dest.join(&top_level).display());
        Ok(top_level)
    }
}

/// Reject absolute paths and parent-directory components
pub fn validate_entry_path(path: &Path) -> KitResult<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(KitError::ArchiveError(format!(
                    "Refusing to extract {}: path leaves the destination directory",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

fn top_level_name(path: &Path) -> KitResult<String> {
    path.components()
        .find_map(|c| match c {
            Component::Normal(name) => Some(PathBuf::from(name)),
            _ => None,
        })
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| KitError::ArchiveError(format!("Entry {} has no usable name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entry_path() {
        assert!(validate_entry_path(Path::new("cifar-10-batches-py/data_batch_1")).is_ok());
        assert!(validate_entry_path(Path::new("./cifar-10-batches-py/")).is_ok());
        assert!(validate_entry_path(Path::new("../escape.txt")).is_err());
        assert!(validate_entry_path(Path::new("dir/../../escape.txt")).is_err());
        assert!(validate_entry_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_top_level_name() {
        assert_eq!(top_level_name(Path::new("cifar-10-batches-py/")).unwrap(), "cifar-10-batches-py");
        assert_eq!(top_level_name(Path::new("./root/file")).unwrap(), "root");
        assert!(top_level_name(Path::new("./")).is_err());
    }

    #[test]
    fn test_garbage_is_archive_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ArchiveExtractor::new(PathPolicy::Strict).extract(b"definitely not gzip", dir.path());
        assert!(matches!(result, Err(KitError::ArchiveError(_))));
    }
}
