//! Region structure for defining the crop area
//!
//! Coordinates are in pixels and follow the usual image convention where
//! (0,0) is the top-left corner of the image.

use crate::errors::{KitError, KitResult};

/// How a crop rectangle reaching outside the source image is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsPolicy {
    /// Fail with a bounds error unless the rectangle lies fully inside
    Reject,
    /// Crop the intersection of the rectangle and the image
    Clamp,
}

/// Crop rectangle (in pixel coordinates)
///
/// Represents the half-open area `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// X-coordinate of the top-left corner (pixels from left)
    pub x: u32,

    /// Y-coordinate of the top-left corner (pixels from top)
    pub y: u32,

    /// Width of the region in pixels
    pub width: u32,

    /// Height of the region in pixels
    pub height: u32,
}

impl Region {
    /// Create a new region
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Region { x, y, width, height }
    }

    /// Build a region from command-line integers
    ///
    /// Negative origins, non-positive sizes and rectangles whose far edge
    /// does not fit in 32 bits are rejected.
    pub fn from_signed(x: i64, y: i64, width: i64, height: i64) -> KitResult<Self> {
        if x < 0 || y < 0 {
            return Err(KitError::BoundsError(format!(
                "top-left corner ({}, {}) must not be negative", x, y
            )));
        }
        if width <= 0 || height <= 0 {
            return Err(KitError::BoundsError(format!(
                "crop size {}x{} must be positive", width, height
            )));
        }

        let to_u32 = |value: i64| u32::try_from(value).map_err(|_| {
            KitError::BoundsError(format!("crop coordinate {} is too large", value))
        });
        let region = Region::new(to_u32(x)?, to_u32(y)?, to_u32(width)?, to_u32(height)?);
        if region.x.checked_add(region.width).is_none() || region.y.checked_add(region.height).is_none() {
            return Err(KitError::BoundsError(format!("crop rectangle {} overflows", region)));
        }
        Ok(region)
    }

    /// Get the rightmost X coordinate (exclusive)
    pub fn end_x(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Get the bottommost Y coordinate (exclusive)
    pub fn end_y(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Whether the region lies fully inside an image of the given size
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.end_x() <= image_width && self.end_y() <= image_height
    }

    /// Intersect the region with an image of the given size
    ///
    /// # Returns
    /// The clipped region, or `None` when nothing of it overlaps the image
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Region> {
        let end_x = self.end_x().min(image_width);
        let end_y = self.end_y().min(image_height);
        if self.x >= end_x || self.y >= end_y {
            return None;
        }
        Some(Region::new(self.x, self.y, end_x - self.x, end_y - self.y))
    }

    /// Resolve the region to crop from an image of the given size
    pub fn resolve(&self, image_width: u32, image_height: u32, policy: BoundsPolicy) -> KitResult<Region> {
        match policy {
            BoundsPolicy::Reject if self.fits_within(image_width, image_height) => Ok(*self),
            BoundsPolicy::Reject => Err(KitError::BoundsError(format!(
                "crop rectangle {} exceeds the {}x{} image", self, image_width, image_height
            ))),
            BoundsPolicy::Clamp => self.clamp_to(image_width, image_height).ok_or_else(|| {
                KitError::BoundsError(format!(
                    "crop rectangle {} does not overlap the {}x{} image", self, image_width, image_height
                ))
            }),
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})-({}, {})", self.x, self.y, self.end_x(), self.end_y())
    }
}
