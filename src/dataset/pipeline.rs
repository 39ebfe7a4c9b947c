//! Fetch, extract, decode and materialize in one run

use log::{info, warn};
use std::fs;
use std::path::Path;

use crate::dataset::batch::{CifarBatch, Split};
use crate::dataset::config::FetchConfig;
use crate::dataset::extractor::ArchiveExtractor;
use crate::dataset::fetcher::ArchiveFetcher;
use crate::dataset::materializer::ImageMaterializer;
use crate::errors::KitResult;

/// Totals for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Batch files processed
    pub batches: usize,
    /// Images written
    pub written: usize,
    /// Records that could not be written
    pub failed: usize,
}

/// Drives the dataset download from archive to image tree
pub struct FetchPipeline<'a> {
    config: &'a FetchConfig,
    fetcher: &'a dyn ArchiveFetcher,
}

impl<'a> FetchPipeline<'a> {
    pub fn new(config: &'a FetchConfig, fetcher: &'a dyn ArchiveFetcher) -> Self {
        FetchPipeline { config, fetcher }
    }

    /// Run every stage; the first error aborts the run
    pub fn run(&self) -> KitResult<FetchSummary> {
        info!("Downloading CIFAR10 from {} .", self.config.url);
        let archive = self.fetcher.fetch(&self.config.url)?;

        info!("Extracting data.");
        let extractor = ArchiveExtractor::new(self.config.path_policy);
        let top_level = extractor.extract(&archive, &self.config.extract_dir)?;
        drop(archive);

        let extracted_dir = self.config.extract_dir.join(&top_level);
        self.materialize_dir(&extracted_dir)
    }

    /// Convert every batch file found directly inside `extracted_dir`
    pub fn materialize_dir(&self, extracted_dir: &Path) -> KitResult<FetchSummary> {
        let mut names = Vec::new();
        for entry in fs::read_dir(extracted_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let materializer = ImageMaterializer::new(self.config.failure_policy, self.config.show_progress);
        let mut summary = FetchSummary::default();
        for name in names {
            let Some(split) = Split::from_batch_name(&name) else {
                continue;
            };

            let out_dir = self.config.split_dir(split);
            info!("Storing {} to {}", name, out_dir.display());
            let batch = CifarBatch::load(&extracted_dir.join(&name))?;
            let report = materializer.write_batch(&batch, &out_dir)?;

            summary.batches += 1;
            summary.written += report.written;
            summary.failed += report.failed;
        }

        if summary.batches == 0 {
            warn!("No batch files found in {}", extracted_dir.display());
        }
        if summary.failed > 0 {
            warn!("{} records could not be written", summary.failed);
        }
        info!("Wrote {} images from {} batches", summary.written, summary.batches);
        Ok(summary)
    }
}
