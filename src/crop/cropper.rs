//! Crop-and-save for single image files

use log::{debug, info};
use std::path::Path;

use crate::crop::plan::CropPlan;
use crate::crop::region::{BoundsPolicy, Region};
use crate::errors::KitResult;

/// Applies one crop rectangle to image files
pub struct Cropper {
    region: Region,
    policy: BoundsPolicy,
}

impl Cropper {
    pub fn new(region: Region, policy: BoundsPolicy) -> Self {
        Cropper { region, policy }
    }

    /// Crop `input` and save the result to `output`
    ///
    /// The output format is chosen from the output file's extension.
    pub fn crop_file(&self, input: &Path, output: &Path) -> KitResult<()> {
        let img = image::open(input)?;
        let region = self.region.resolve(img.width(), img.height(), self.policy)?;
        if region != self.region {
            debug!("Clamped {} to {} for {}", self.region, region, input.display());
        }

        let cropped = img.crop_imm(region.x, region.y, region.width, region.height);
        cropped.save(output)?;
        Ok(())
    }

    /// Run every job of a plan, creating the output directory first
    ///
    /// # Returns
    /// The number of files written
    pub fn run(&self, plan: &CropPlan) -> KitResult<usize> {
        plan.prepare_output_dir()?;
        for job in &plan.jobs {
            info!("Cropping {} to {}.", job.input.display(), job.output.display());
            self.crop_file(&job.input, &job.output)?;
        }
        Ok(plan.jobs.len())
    }
}

/// Crop a file or a directory of images in one call
pub fn crop_path(image_path: &Path, output_path: &Path, region: Region, policy: BoundsPolicy) -> KitResult<usize> {
    let plan = CropPlan::from_paths(image_path, output_path)?;
    Cropper::new(region, policy).run(&plan)
}
