//! Pixel layout transforms
//!
//! Batch files store each record channel-planar: all of channel 0 as a
//! row-major grid, then channel 1, then channel 2. Image encoders expect
//! row-major interleaved pixels where each pixel's channels are adjacent.

use crate::errors::{KitError, KitResult};

/// Number of color channels per record
pub const CHANNELS: usize = 3;
/// Record height in pixels
pub const HEIGHT: usize = 32;
/// Record width in pixels
pub const WIDTH: usize = 32;
/// Bytes occupied by one record in the pixel buffer
pub const RECORD_BYTES: usize = CHANNELS * HEIGHT * WIDTH;

/// Permute a (channels, height, width) buffer into (height, width, channels)
///
/// Output index `(y * width + x) * channels + c` takes input index
/// `c * height * width + y * width + x`. This is a pure reordering of bytes:
/// no value is resized or color-converted.
///
/// # Arguments
/// * `planar` - Channel-planar pixel data
/// * `channels` - Number of planes
/// * `height` - Rows per plane
/// * `width` - Columns per plane
///
/// # Returns
/// Interleaved pixel data, or a format error if the slice has the wrong length
pub fn planar_to_interleaved(planar: &[u8], channels: usize, height: usize, width: usize) -> KitResult<Vec<u8>> {
    let plane = height * width;
    if planar.len() != channels * plane {
        return Err(KitError::FormatError(format!(
            "pixel slice holds {} bytes, expected {}x{}x{} = {}",
            planar.len(), channels, height, width, channels * plane
        )));
    }

    let mut interleaved = vec![0u8; planar.len()];
    for (c, plane_data) in planar.chunks_exact(plane.max(1)).enumerate() {
        for (p, &value) in plane_data.iter().enumerate() {
            interleaved[p * channels + c] = value;
        }
    }
    Ok(interleaved)
}

/// Convert one batch record (3x32x32 planar) into 32x32 RGB interleaved bytes
pub fn cifar_record_to_rgb(planar: &[u8]) -> KitResult<Vec<u8>> {
    planar_to_interleaved(planar, CHANNELS, HEIGHT, WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_by_two_permutation() {
        // R plane, G plane, B plane of a 2x2 image
        let planar = [1, 2, 3, 4, 11, 12, 13, 14, 21, 22, 23, 24];
        let interleaved = planar_to_interleaved(&planar, 3, 2, 2).unwrap();
        assert_eq!(interleaved, vec![1, 11, 21, 2, 12, 22, 3, 13, 23, 4, 14, 24]);
    }

    #[test]
    fn test_non_square_plane() {
        // 2 channels, 1 row, 3 columns
        let planar = [1, 2, 3, 4, 5, 6];
        let interleaved = planar_to_interleaved(&planar, 2, 1, 3).unwrap();
        assert_eq!(interleaved, vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_cifar_record_pixel_positions() {
        let mut planar = vec![0u8; RECORD_BYTES];
        // channel 2 (blue), row 5, column 7
        planar[2 * HEIGHT * WIDTH + 5 * WIDTH + 7] = 200;
        // channel 0 (red), last pixel
        planar[HEIGHT * WIDTH - 1] = 99;

        let rgb = cifar_record_to_rgb(&planar).unwrap();
        assert_eq!(rgb.len(), RECORD_BYTES);
        assert_eq!(rgb[(5 * WIDTH + 7) * CHANNELS + 2], 200);
        assert_eq!(rgb[(HEIGHT * WIDTH - 1) * CHANNELS], 99);
        assert_eq!(rgb.iter().filter(|&&v| v != 0).count(), 2);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let result = cifar_record_to_rgb(&[0u8; RECORD_BYTES - 1]);
        assert!(matches!(result, Err(KitError::FormatError(_))));
    }
}
