//! Writes batch records out as individual image files

use image::RgbImage;
use log::{debug, error, info};
use std::fs;
use std::path::Path;

use crate::dataset::batch::{CifarBatch, Record};
use crate::dataset::config::FailurePolicy;
use crate::dataset::layout::{self, HEIGHT, WIDTH};
use crate::errors::{KitError, KitResult};
use crate::utils::progress::ProgressTracker;

/// Outcome of writing one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Images written successfully
    pub written: usize,
    /// Records that failed (only non-zero under `FailurePolicy::Continue`)
    pub failed: usize,
}

/// Converts records to RGB images and saves them
pub struct ImageMaterializer {
    failure_policy: FailurePolicy,
    show_progress: bool,
}

impl ImageMaterializer {
    pub fn new(failure_policy: FailurePolicy, show_progress: bool) -> Self {
        ImageMaterializer {
            failure_policy,
            show_progress,
        }
    }

    /// Write every record of `batch` into `out_dir`
    ///
    /// The directory is created if missing and existing files with the same
    /// name are overwritten. The image format follows each file name's
    /// extension.
    pub fn write_batch(&self, batch: &CifarBatch, out_dir: &Path) -> KitResult<MaterializeReport> {
        fs::create_dir_all(out_dir)?;

        let progress = if self.show_progress {
            ProgressTracker::new(batch.len() as u64, &batch.name)
        } else {
            ProgressTracker::hidden()
        };

        let mut report = MaterializeReport::default();
        for record in batch.records() {
            match Self::write_record(&record, out_dir) {
                Ok(()) => report.written += 1,
                Err(e) => match self.failure_policy {
                    FailurePolicy::Abort => {
                        progress.finish();
                        return Err(e);
                    },
                    FailurePolicy::Continue => {
                        error!("Failed to write {} (record {} of {}): {}",
                               record.filename, record.index, batch.name, e);
                        report.failed += 1;
                    }
                }
            }
            progress.increment(1);
        }
        progress.finish();

        info!("Wrote {} images from {} to {}", report.written, batch.name, out_dir.display());
        Ok(report)
    }

    /// Encode and save a single record
    pub fn write_record(record: &Record<'_>, out_dir: &Path) -> KitResult<()> {
        let rgb = layout::cifar_record_to_rgb(record.pixels)?;
        let img = RgbImage::from_raw(WIDTH as u32, HEIGHT as u32, rgb).ok_or_else(|| {
            KitError::FormatError(format!("record {} does not fill a {}x{} image", record.index, WIDTH, HEIGHT))
        })?;

        let out_path = out_dir.join(record.filename);
        debug!("Saving {}", out_path.display());
        img.save(&out_path)?;
        Ok(())
    }
}
