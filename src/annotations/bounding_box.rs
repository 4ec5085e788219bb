use serde::Serialize;
use std::fmt;

/// A struct representing a bounding box.
///
/// A bounding box is the smallest rectangle that totally contains an object within an image.
/// Detection decoders produce bounding boxes in several coordinate frames along the way
/// (network input space, letterboxed space, original image space); only boxes in original
/// image space ever leave the decode stage, so this struct does not carry a frame tag.
///
/// This project uses the standard convention of the left side of the image being x=0 and the
/// top of the image being y=0.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl BoundingBox {
    /// Checks that a box has valid corner ordering before constructing.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Result<Self, String> {
        if left > right {
            Err(format!(
                "Failed to create BoundingBox, value for left > value for right ({} > {}).",
                left, right
            ))
        } else if top > bottom {
            Err(format!(
                "Failed to create BoundingBox, value for top > value for bottom ({} > {}).",
                top, bottom
            ))
        } else {
            Ok(BoundingBox {
                left,
                top,
                right,
                bottom,
            })
        }
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn top(&self) -> f32 {
        self.top
    }

    pub fn right(&self) -> f32 {
        self.right
    }

    pub fn bottom(&self) -> f32 {
        self.bottom
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Computes the intersection-over-union between this box and another.
    ///
    /// Returns 0.0 when the union is empty so that two degenerate boxes never
    /// suppress each other.
    pub fn intersection_over_union(&self, other: &BoundingBox) -> f32 {
        let intersect_left = self.left.max(other.left);
        let intersect_top = self.top.max(other.top);
        let intersect_right = self.right.min(other.right);
        let intersect_bottom = self.bottom.min(other.bottom);
        let intersection = (intersect_right - intersect_left).max(0.0)
            * (intersect_bottom - intersect_top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamps the box corners into the rectangle [0, width] x [0, height].
    ///
    /// The inverse letterbox transform can place coordinates outside the original image;
    /// decoders clamp before emitting detections.
    pub fn clamp_to(&self, width: f32, height: f32) -> BoundingBox {
        BoundingBox {
            left: self.left.clamp(0.0, width),
            top: self.top.clamp(0.0, height),
            right: self.right.clamp(0.0, width),
            bottom: self.bottom.clamp(0.0, height),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}, {:.1})",
            self.left, self.top, self.right, self.bottom
        )
    }
}
