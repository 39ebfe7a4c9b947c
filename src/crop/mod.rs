//! Batch image cropping
//!
//! Crops one image, or every image in a directory, to a fixed rectangle.

mod region;
mod plan;
mod cropper;

pub use region::{BoundsPolicy, Region};
pub use plan::{has_image_extension, CropJob, CropPlan, IMAGE_EXTENSIONS};
pub use cropper::{crop_path, Cropper};
