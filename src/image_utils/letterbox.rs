use image::{Rgb, RgbImage, imageops};

/// The scaling and padding applied by one letterbox resize.
///
/// Produced once per image at preprocessing time; the pad amounts always fill the target
/// size exactly: new_h + pad_top + pad_bottom == target height (same for width).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_top: u32,
    pub pad_bottom: u32,
    pub pad_left: u32,
    pub pad_right: u32,
}

/// Pixel value used to fill the padded border.
const PAD_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

/// Resizes an image while keeping its aspect ratio, padding the rest with constant gray.
///
/// The image is scaled by min(target_h / h, target_w / w), so the longer side exactly
/// fills the target and the shorter side is centered between two pad bands. Nearest
/// neighbor interpolation keeps the operation deterministic.
pub fn letter_box(image: &RgbImage, size: (u32, u32)) -> (RgbImage, LetterboxTransform) {
    let (target_h, target_w) = size;
    let h = image.height();
    let w = image.width();
    let scale = (target_h as f32 / h as f32).min(target_w as f32 / w as f32);
    let new_h = (h as f32 * scale) as u32;
    let new_w = (w as f32 * scale) as u32;
    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Nearest);

    let pad_top = (target_h - new_h) / 2;
    let pad_bottom = target_h - new_h - pad_top;
    let pad_left = (target_w - new_w) / 2;
    let pad_right = target_w - new_w - pad_left;

    let mut padded = RgbImage::from_pixel(target_w, target_h, PAD_COLOR);
    for (x, y, pixel) in resized.enumerate_pixels() {
        padded.put_pixel(x + pad_left, y + pad_top, *pixel);
    }
    (
        padded,
        LetterboxTransform {
            scale,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
        },
    )
}

/// Maps boxes from letterboxed space back into original image coordinates.
///
/// `boxes` are normalized to [0, 1] relative to the square network input. When `xywh` is
/// true they are center-form (cx, cy, w, h), otherwise corner-form (xmin, ymin, xmax,
/// ymax). The returned boxes are corner-form in original pixel coordinates.
///
/// The scale here is max(h, w) / input_size, the reciprocal of the min-based forward
/// scale, and the pad amounts are recomputed from the original dimensions rather than
/// carried over, matching the training convention this project decodes against. Boxes
/// may land outside [0, w] x [0, h]; clamping is the caller's responsibility.
pub fn reverse_letter_box(
    h: u32,
    w: u32,
    input_size: u32,
    boxes: &[[f32; 4]],
    xywh: bool,
) -> Vec<[f32; 4]> {
    let input = input_size as f32;
    let scale = (h as f32 / input).max(w as f32 / input);
    let pad_top = ((input - h as f32 / scale) / 2.0).floor();
    let pad_left = ((input - w as f32 / scale) / 2.0).floor();

    boxes
        .iter()
        .map(|b| {
            let mut corners = if xywh {
                [
                    b[0] - b[2] / 2.0,
                    b[1] - b[3] / 2.0,
                    b[0] + b[2] / 2.0,
                    b[1] + b[3] / 2.0,
                ]
            } else {
                *b
            };
            for value in corners.iter_mut() {
                *value *= input;
            }
            corners[0] -= pad_left;
            corners[2] -= pad_left;
            corners[1] -= pad_top;
            corners[3] -= pad_top;
            for value in corners.iter_mut() {
                *value *= scale;
            }
            corners
        })
        .collect()
}
