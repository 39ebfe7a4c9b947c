//! Image cropping command
//!
//! Crops a single image, or every image of a directory, to one rectangle.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command as ClapCommand};
use log::info;
use std::path::PathBuf;

use crate::commands::command_traits::Command;
use crate::crop::{crop_path, BoundsPolicy, Region};
use crate::errors::{KitError, KitResult};

fn coordinate_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .value_name("INT")
        .value_parser(value_parser!(i64))
        .allow_negative_numbers(true)
        .required(true)
}

/// Argument definitions for the `crop-image` binary
pub fn crop_cli() -> ClapCommand {
    ClapCommand::new("crop-image")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Crop an image, or every image in a directory, to a rectangle")
        .arg(
            Arg::new("image_path")
                .long("image_path")
                .help("Image file or directory of images to crop")
                .value_name("PATH")
                .required(true),
        )
        .arg(coordinate_arg("top_left_x", "X-coordinate of the top-left corner of the crop area"))
        .arg(coordinate_arg("top_left_y", "Y-coordinate of the top-left corner of the crop area"))
        .arg(coordinate_arg("width", "Width of the crop area"))
        .arg(coordinate_arg("height", "Height of the crop area"))
        .arg(
            Arg::new("output_path")
                .long("output_path")
                .help("Output image file, or output directory when cropping a directory")
                .value_name("PATH")
                .required(true),
        )
        .arg(
            Arg::new("clamp")
                .long("clamp")
                .help("Clip the rectangle to the image instead of failing when it reaches outside")
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

/// Command for cropping images
#[derive(Debug)]
pub struct CropCommand {
    /// Input file or directory
    image_path: PathBuf,
    /// Output file or directory
    output_path: PathBuf,
    /// Rectangle to keep
    region: Region,
    /// Handling of rectangles reaching outside the image
    bounds_policy: BoundsPolicy,
}

impl CropCommand {
    /// Create a new crop command
    ///
    /// # Arguments
    /// * `args` - CLI argument matches from clap
    ///
    /// # Returns
    /// A new CropCommand instance or an error
    pub fn new(args: &ArgMatches) -> KitResult<Self> {
        let image_path = Self::path_arg(args, "image_path")?;
        let output_path = Self::path_arg(args, "output_path")?;

        let region = Region::from_signed(
            Self::int_arg(args, "top_left_x")?,
            Self::int_arg(args, "top_left_y")?,
            Self::int_arg(args, "width")?,
            Self::int_arg(args, "height")?,
        )?;

        let bounds_policy = if args.get_flag("clamp") {
            BoundsPolicy::Clamp
        } else {
            BoundsPolicy::Reject
        };

        Ok(CropCommand {
            image_path,
            output_path,
            region,
            bounds_policy,
        })
    }

    fn path_arg(args: &ArgMatches, name: &str) -> KitResult<PathBuf> {
        args.get_one::<String>(name)
            .map(PathBuf::from)
            .ok_or_else(|| KitError::GenericError(format!("Missing --{}", name)))
    }

    fn int_arg(args: &ArgMatches, name: &str) -> KitResult<i64> {
        args.get_one::<i64>(name)
            .copied()
            .ok_or_else(|| KitError::GenericError(format!("Missing --{}", name)))
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn bounds_policy(&self) -> BoundsPolicy {
        self.bounds_policy
    }
}

impl Command for CropCommand {
    fn execute(&self) -> KitResult<()> {
        info!("Cropping {} with rectangle {}", self.image_path.display(), self.region);
        let written = crop_path(&self.image_path, &self.output_path, self.region, self.bounds_policy)?;
        info!("Cropped {} image(s)", written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<ArgMatches, clap::Error> {
        let mut argv = vec![
            "crop-image",
            "--image_path", "in.png",
            "--top_left_x", "1",
            "--top_left_y", "2",
            "--width", "3",
            "--height", "4",
            "--output_path", "out.png",
        ];
        argv.extend_from_slice(extra);
        crop_cli().try_get_matches_from(argv)
    }

    #[test]
    fn test_parses_required_arguments() {
        let matches = parse(&[]).unwrap();
        let command = CropCommand::new(&matches).unwrap();
        assert_eq!(command.region(), Region::new(1, 2, 3, 4));
        assert_eq!(command.bounds_policy(), BoundsPolicy::Reject);
    }

    #[test]
    fn test_clamp_flag() {
        let matches = parse(&["--clamp"]).unwrap();
        let command = CropCommand::new(&matches).unwrap();
        assert_eq!(command.bounds_policy(), BoundsPolicy::Clamp);
    }

    #[test]
    fn test_missing_argument_is_rejected() {
        let result = crop_cli().try_get_matches_from(["crop-image", "--image_path", "in.png"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_coordinate_is_bounds_error() {
        let matches = crop_cli()
            .try_get_matches_from([
                "crop-image",
                "--image_path", "in.png",
                "--top_left_x", "-4",
                "--top_left_y", "0",
                "--width", "3",
                "--height", "4",
                "--output_path", "out.png",
            ])
            .unwrap();
        assert!(matches!(CropCommand::new(&matches), Err(KitError::BoundsError(_))));
    }

    #[test]
    fn test_non_integer_is_rejected() {
        let result = crop_cli().try_get_matches_from([
            "crop-image",
            "--image_path", "in.png",
            "--top_left_x", "one",
            "--top_left_y", "0",
            "--width", "3",
            "--height", "4",
            "--output_path", "out.png",
        ]);
        assert!(result.is_err());
    }
}
