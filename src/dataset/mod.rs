//! Dataset fetch-and-unpack pipeline
//!
//! Downloads the CIFAR-10 python archive, extracts it, decodes each pickled
//! batch file and writes every record as an image under a train or test
//! directory chosen by the batch file's name.

pub mod config;
pub mod fetcher;
pub mod extractor;
pub mod batch;
pub mod layout;
pub mod materializer;
pub mod pipeline;

pub use config::{FetchConfig, PathPolicy, FailurePolicy, CIFAR10_URL, OUT_DIR};
pub use fetcher::{ArchiveFetcher, HttpFetcher};
pub use extractor::ArchiveExtractor;
pub use batch::{CifarBatch, Record, Split};
pub use materializer::{ImageMaterializer, MaterializeReport};
pub use pipeline::{FetchPipeline, FetchSummary};
