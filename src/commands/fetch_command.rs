//! Dataset fetch command
//!
//! Downloads the CIFAR-10 archive and writes every record as an image file.
//! Without arguments it uses the built-in defaults.

use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand};
use log::{info, warn};
use std::path::Path;

use crate::commands::command_traits::Command;
use crate::dataset::{FailurePolicy, FetchConfig, FetchPipeline, HttpFetcher, PathPolicy};
use crate::errors::KitResult;

/// Argument definitions for the `fetch-cifar10` binary
pub fn fetch_cli() -> ClapCommand {
    ClapCommand::new("fetch-cifar10")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Download CIFAR-10 and store every image as a file under train/ and test/")
        .arg(
            Arg::new("config")
                .long("config")
                .help("TOML file overriding the URL, directories and policies")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .help("Log records that fail to write and continue instead of aborting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("trust-archive-paths")
                .long("trust-archive-paths")
                .help("Extract archive entries even if their paths leave the extraction directory")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Do not draw progress bars")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write log output to this file")
                .value_name("FILE"),
        )
}

/// Command for fetching and unpacking the dataset
#[derive(Debug)]
pub struct FetchCommand {
    config: FetchConfig,
}

impl FetchCommand {
    /// Create a new fetch command
    ///
    /// Values from `--config` are applied first; flags override them.
    pub fn new(args: &ArgMatches) -> KitResult<Self> {
        let mut config = match args.get_one::<String>("config") {
            Some(path) => {
                info!("Loading configuration from {}", path);
                FetchConfig::from_file(Path::new(path))?
            },
            None => FetchConfig::default(),
        };

        if args.get_flag("keep-going") {
            config.failure_policy = FailurePolicy::Continue;
        }
        if args.get_flag("trust-archive-paths") {
            config.path_policy = PathPolicy::Trust;
        }
        if args.get_flag("quiet") {
            config.show_progress = false;
        }

        Ok(FetchCommand { config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

impl Command for FetchCommand {
    fn execute(&self) -> KitResult<()> {
        if self.config.path_policy == PathPolicy::Trust {
            warn!("Archive entry paths are not validated");
        }

        let fetcher = HttpFetcher::new(self.config.request_timeout, self.config.show_progress)?;
        let summary = FetchPipeline::new(&self.config, &fetcher).run()?;

        info!("Done: {} images from {} batches under {}",
              summary.written, summary.batches, self.config.output_dir.display());
        Ok(())
    }
}
