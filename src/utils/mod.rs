//! Utility modules for common functionality
//!
//! Logging and progress reporting shared by both tools.

pub mod logger;
pub mod progress;
