//! Input enumeration for the cropping tool
//!
//! A directory input crops every image inside it into the output directory,
//! keeping base names. A single-file input is cropped only when both the input
//! and the output path carry an image extension.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{KitError, KitResult};

/// Extensions recognized as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpeg", "jpg"];

/// Whether the path ends in one of the recognized image extensions
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// A single source to destination pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Every crop to perform plus the directory receiving the results
#[derive(Debug, Clone)]
pub struct CropPlan {
    pub jobs: Vec<CropJob>,
    pub out_dir: PathBuf,
}

impl CropPlan {
    /// Enumerate eligible inputs
    ///
    /// # Returns
    /// The plan, or `NoInputError` if no eligible file was found
    pub fn from_paths(image_path: &Path, output_path: &Path) -> KitResult<Self> {
        let (jobs, out_dir) = if image_path.is_dir() {
            (Self::directory_jobs(image_path, output_path)?, output_path.to_path_buf())
        } else {
            let mut jobs = Vec::new();
            if has_image_extension(image_path) && has_image_extension(output_path) {
                jobs.push(CropJob {
                    input: image_path.to_path_buf(),
                    output: output_path.to_path_buf(),
                });
            }
            let out_dir = match output_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            (jobs, out_dir)
        };

        if jobs.is_empty() {
            return Err(KitError::NoInputError(format!(
                "No image file found at {}", image_path.display()
            )));
        }

        debug!("Planned {} crops into {}", jobs.len(), out_dir.display());
        Ok(CropPlan { jobs, out_dir })
    }

    fn directory_jobs(input_dir: &Path, output_dir: &Path) -> KitResult<Vec<CropJob>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(input_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !has_image_extension(&path) {
                debug!("Skipping {}", path.display());
                continue;
            }
            jobs.push(CropJob {
                output: output_dir.join(entry.file_name()),
                input: path,
            });
        }
        jobs.sort_by(|a, b| a.input.cmp(&b.input));
        Ok(jobs)
    }

    /// Create the output directory, including parents
    pub fn prepare_output_dir(&self) -> KitResult<()> {
        fs::create_dir_all(&self.out_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension(Path::new("a.png")));
        assert!(has_image_extension(Path::new("dir/b.JPG")));
        assert!(has_image_extension(Path::new("c.jpeg")));
        assert!(!has_image_extension(Path::new("d.txt")));
        assert!(!has_image_extension(Path::new("png")));
        assert!(!has_image_extension(Path::new("e.png.bak")));
    }

    #[test]
    fn test_single_file_plan() {
        let plan = CropPlan::from_paths(Path::new("in/a.png"), Path::new("out/sub/b.jpg")).unwrap();
        assert_eq!(plan.jobs, vec![CropJob {
            input: PathBuf::from("in/a.png"),
            output: PathBuf::from("out/sub/b.jpg"),
        }]);
        assert_eq!(plan.out_dir, PathBuf::from("out/sub"));
    }

    #[test]
    fn test_single_file_output_in_working_dir() {
        let plan = CropPlan::from_paths(Path::new("a.png"), Path::new("b.png")).unwrap();
        assert_eq!(plan.out_dir, PathBuf::from("."));
    }

    #[test]
    fn test_single_file_needs_both_extensions() {
        let result = CropPlan::from_paths(Path::new("a.png"), Path::new("out/result"));
        assert!(matches!(result, Err(KitError::NoInputError(_))));
        let result = CropPlan::from_paths(Path::new("a.gif"), Path::new("out/b.png"));
        assert!(matches!(result, Err(KitError::NoInputError(_))));
    }

    #[test]
    fn test_directory_plan_filters_and_sorts() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["b.jpg", "a.png", "notes.txt", "c.JPEG"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let out = dir.path().join("out");
        let plan = CropPlan::from_paths(dir.path(), &out).unwrap();
        let outputs: Vec<PathBuf> = plan.jobs.iter().map(|j| j.output.clone()).collect();
        assert_eq!(outputs, vec![out.join("a.png"), out.join("b.jpg"), out.join("c.JPEG")]);
        assert_eq!(plan.out_dir, out);
        assert!(!out.exists());

        plan.prepare_output_dir().unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_empty_directory_is_no_input() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), b"").unwrap();
        let result = CropPlan::from_paths(dir.path(), &dir.path().join("out"));
        assert!(matches!(result, Err(KitError::NoInputError(_))));
    }
}
