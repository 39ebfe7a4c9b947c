//! CLI command implementations
//!
//! This module contains the commands behind the `crop-image` and
//! `fetch-cifar10` binaries using the Command pattern.

pub mod command_traits;
pub mod crop_command;
pub mod fetch_command;

pub use command_traits::Command;
pub use crop_command::{crop_cli, CropCommand};
pub use fetch_command::{fetch_cli, FetchCommand};

use clap::ArgMatches;
use log::LevelFilter;
use std::path::PathBuf;

/// Logging options shared by both binaries
pub fn log_settings(args: &ArgMatches) -> (Option<PathBuf>, LevelFilter) {
    let log_file = args.get_one::<String>("log-file").map(PathBuf::from);
    let level = if args.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    (log_file, level)
}
