use crate::annotations::bounding_box::BoundingBox;
use serde::Serialize;
use std::fmt;

/// A detection is what is produced as output from a detection decoder.
///
/// A detection combines a bounding box in original-image coordinates with a confidence
/// score (a probability value encoding the model's belief that the detection is true)
/// and the index of the predicted class. Detections are created by the decode stage,
/// filtered by score threshold and non-maximum suppression, and finally consumed by the
/// renderer or printer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_id: usize,
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {} {:.2} {}", self.class_id, self.score, self.bbox)
    }
}
