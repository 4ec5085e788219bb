use image::RgbImage;
use ndarray::{Array, Array4};

/// Converts an rgb8 image into a normalized float tensor.
///
/// The dimensions of the returned array encode (image, channel, row, column), so a
/// single image becomes shape (1, 3, height, width) with values scaled into [0, 1].
/// This is the layout the detection models consume.
pub fn convert_rgb_image_to_owned_array(rgb_image: &RgbImage) -> Array4<f32> {
    let mut image_array = Array::zeros((
        1,
        3,
        rgb_image.height() as usize,
        rgb_image.width() as usize,
    ));
    for pixel in rgb_image.enumerate_pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b] = pixel.2.0;
        image_array[[0, 0, y, x]] = (r as f32) / 255.;
        image_array[[0, 1, y, x]] = (g as f32) / 255.;
        image_array[[0, 2, y, x]] = (b as f32) / 255.;
    }
    image_array
}
