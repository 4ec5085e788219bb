use crate::configs::config::ReadMode;
use image::{Rgb, RgbImage};
use std::path::Path;

/// Reads an image from disk in the requested channel order.
///
/// The pixels are always returned in an `RgbImage` buffer; for `Bgr` the red and blue
/// channels are swapped in place, and for `Gray` the luma value is replicated across all
/// three channels. The mode string itself is validated at config load time, so by the
/// time this runs the mode is known to be supported.
pub fn read_image(filepath: &Path, mode: ReadMode) -> Result<RgbImage, image::ImageError> {
    let rgb = image::open(filepath)?.into_rgb8();
    Ok(match mode {
        ReadMode::Rgb => rgb,
        ReadMode::Bgr => {
            let mut bgr = rgb;
            for pixel in bgr.pixels_mut() {
                let [r, g, b] = pixel.0;
                *pixel = Rgb([b, g, r]);
            }
            bgr
        }
        ReadMode::Gray => {
            let mut gray = rgb;
            for pixel in gray.pixels_mut() {
                let [r, g, b] = pixel.0;
                let luma =
                    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8;
                *pixel = Rgb([luma, luma, luma]);
            }
            gray
        }
    })
}
