use crate::annotations::detection::Detection;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// A small cycling palette so that neighboring class ids get visually distinct boxes.
const CLASS_COLORS: [[u8; 3]; 12] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [250, 190, 190],
    [0, 128, 128],
    [170, 110, 40],
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(CLASS_COLORS[class_id % CLASS_COLORS.len()])
}

/// Draws each detection as a two-pixel hollow rectangle in its class color.
///
/// Boxes are expected to already be clamped into the image; degenerate boxes narrower
/// than the border itself are skipped.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        let left = detection.bbox.left().round() as i32;
        let top = detection.bbox.top().round() as i32;
        let width = detection.bbox.width().round() as u32;
        let height = detection.bbox.height().round() as u32;
        if width < 4 || height < 4 {
            continue;
        }
        let color = class_color(detection.class_id);
        draw_hollow_rect_mut(image, Rect::at(left, top).of_size(width, height), color);
        draw_hollow_rect_mut(
            image,
            Rect::at(left + 1, top + 1).of_size(width - 2, height - 2),
            color,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::bounding_box::BoundingBox;

    #[test]
    fn draws_the_box_border_and_leaves_the_interior() {
        let mut image = RgbImage::new(32, 32);
        let detections = vec![Detection {
            bbox: BoundingBox::new(4.0, 4.0, 20.0, 20.0).unwrap(),
            score: 0.9,
            class_id: 0,
        }];
        draw_detections(&mut image, &detections);
        assert_eq!(image.get_pixel(4, 4), &class_color(0));
        assert_eq!(image.get_pixel(4, 12), &class_color(0));
        assert_eq!(image.get_pixel(12, 12), &Rgb([0, 0, 0]));
    }

    #[test]
    fn skips_degenerate_boxes() {
        let mut image = RgbImage::new(32, 32);
        let detections = vec![Detection {
            bbox: BoundingBox::new(10.0, 10.0, 11.0, 11.0).unwrap(),
            score: 0.9,
            class_id: 1,
        }];
        draw_detections(&mut image, &detections);
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn class_colors_cycle() {
        assert_eq!(class_color(0), class_color(12));
        assert_ne!(class_color(0), class_color(1));
    }
}
