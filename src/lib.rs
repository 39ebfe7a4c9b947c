pub mod errors;
pub mod io;
pub mod utils;
pub mod crop;
pub mod dataset;
pub mod commands;

pub use errors::{KitError, KitResult};
pub use crop::{crop_path, BoundsPolicy, CropPlan, Cropper, Region};
pub use dataset::{CifarBatch, FetchConfig, FetchPipeline, FetchSummary, Split};
