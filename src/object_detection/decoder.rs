use crate::annotations::bounding_box::BoundingBox;
use crate::annotations::detection::Detection;
use crate::configs::config::{Architecture, DetectConfig};
use crate::image_utils::letterbox::reverse_letter_box;
use crate::object_detection::centernet::CenterNetDecoder;
use crate::object_detection::ssd::SsdDecoder;
use crate::object_detection::yolov3::YoloV3Decoder;
use crate::object_detection::yolov7::Yolo7Decoder;
use ndarray::{Array2, Array3};
use std::fmt;

/// The raw dense tensors a detection network produces, one layout per architecture.
///
/// All arrays are already materialized on the CPU with the batch dimension removed.
#[derive(Clone, Debug)]
pub enum RawPrediction {
    /// Per-default-box offsets and per-class scores.
    Ssd {
        /// Shape (num_default_boxes, 4), encoded center/size offsets.
        boxes: Array2<f32>,
        /// Shape (num_default_boxes, num_classes), class probabilities.
        scores: Array2<f32>,
    },
    /// Class heatmap plus sub-pixel offset and size maps at reduced resolution.
    CenterNet {
        /// Shape (num_classes, input/r, input/r), sigmoid-activated scores.
        heatmap: Array3<f32>,
        /// Shape (2, input/r, input/r), (x, y) center offsets in heatmap cells.
        offset: Array3<f32>,
        /// Shape (2, input/r, input/r), (w, h) box sizes in heatmap cells.
        size: Array3<f32>,
    },
    /// One tensor per detection scale, shape (anchors_per_scale * grid * grid,
    /// 5 + num_classes) with raw logits.
    Yolo { feature_maps: Vec<Array2<f32>> },
}

/// A set of custom errors for the decode stage.
///
/// Shape mismatches are fatal configuration problems, never silently coerced.
#[derive(Debug)]
pub enum DecodeError {
    WrongPredictionKind {
        decoder: Architecture,
    },
    ShapeMismatch {
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },
    MissingArchSection(Architecture),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::WrongPredictionKind { decoder } => {
                write!(
                    f,
                    "Raw prediction layout does not belong to the {} decoder.",
                    decoder
                )
            }
            DecodeError::ShapeMismatch {
                tensor,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Tensor {:?} has shape {:?}, expected {}.",
                    tensor, actual, expected
                )
            }
            DecodeError::MissingArchSection(architecture) => {
                write!(f, "Config has no {} section.", architecture)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Defines the contract every per-architecture decoder follows.
///
/// Decoders are stateless pure functions: raw prediction in, detections in original
/// image coordinates out. The output order carries no meaning; non-maximum suppression
/// re-sorts by score.
pub trait Decoder {
    fn decode(
        &self,
        raw: &RawPrediction,
        config: &DetectConfig,
        original_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError>;
}

/// Dispatches to the decoder for an architecture tag.
pub fn decoder_for(architecture: Architecture) -> Box<dyn Decoder> {
    match architecture {
        Architecture::Ssd => Box::new(SsdDecoder),
        Architecture::Centernet => Box::new(CenterNetDecoder),
        Architecture::Yolov3 => Box::new(YoloV3Decoder),
        Architecture::Yolo7 => Box::new(Yolo7Decoder),
    }
}

/// A candidate detection still in coordinates normalized to the letterboxed input.
pub(crate) struct Candidate {
    /// Center-form (cx, cy, w, h) or corner-form, both normalized to [0, 1];
    /// `finalize_detections` is told which via its `xywh` flag.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
}

/// Turns candidates into final detections in original image coordinates.
///
/// Candidates beyond `max_boxes_per_img` are dropped lowest-score-first, then the
/// letterbox transform is inverted and every surviving box is clamped into the image.
/// Boxes that clamp down to nothing (entirely outside the image) are discarded.
pub(crate) fn finalize_detections(
    mut candidates: Vec<Candidate>,
    xywh: bool,
    config: &DetectConfig,
    original_size: (u32, u32),
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    candidates.truncate(config.decode.max_boxes_per_img);

    let (h, w) = original_size;
    let raw_boxes: Vec<[f32; 4]> = candidates.iter().map(|c| c.bbox).collect();
    let restored = reverse_letter_box(h, w, config.arch.input_size, &raw_boxes, xywh);

    candidates
        .iter()
        .zip(restored)
        .filter_map(|(candidate, corners)| {
            let bbox = BoundingBox::new(corners[0], corners[1], corners[2], corners[3])
                .ok()?
                .clamp_to(w as f32, h as f32);
            if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
                return None;
            }
            Some(Detection {
                bbox,
                score: candidate.score,
                class_id: candidate.class_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_config(max_boxes_per_img: usize) -> DetectConfig {
        let json = format!(
            r#"{{
                "arch": {{
                    "name": "centernet",
                    "num_classes": 20,
                    "input_size": 384,
                    "centernet": {{ "downsampling_ratio": 4 }}
                }},
                "dataset": {{ "name": "voc" }},
                "decode": {{
                    "score_threshold": 0.3,
                    "nms_iou_threshold": 0.5,
                    "max_boxes_per_img": {}
                }}
            }}"#,
            max_boxes_per_img
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn caps_candidates_at_the_configured_limit() {
        let config = square_config(100);
        let candidates: Vec<Candidate> = (0..150)
            .map(|i| Candidate {
                bbox: [0.5, 0.5, 0.2, 0.2],
                score: 0.3 + (i as f32) * 0.004,
                class_id: i % 20,
            })
            .collect();
        let detections = finalize_detections(candidates, true, &config, (384, 384));
        assert_eq!(detections.len(), 100);
        // The 100 survivors are exactly the highest-scoring candidates.
        let lowest_kept = detections
            .iter()
            .map(|d| d.score)
            .fold(f32::INFINITY, f32::min);
        assert!((lowest_kept - (0.3 + 50.0 * 0.004)).abs() < 1e-6);
    }

    #[test]
    fn boxes_outside_the_image_are_discarded() {
        let config = square_config(100);
        let candidates = vec![Candidate {
            bbox: [1.5, 1.5, 0.1, 0.1],
            score: 0.9,
            class_id: 0,
        }];
        let detections = finalize_detections(candidates, true, &config, (384, 384));
        assert!(detections.is_empty());
    }

    #[test]
    fn surviving_boxes_are_clamped_into_the_image() {
        let config = square_config(100);
        // A box hanging off the right edge of a square image.
        let candidates = vec![Candidate {
            bbox: [0.95, 0.5, 0.2, 0.2],
            score: 0.9,
            class_id: 0,
        }];
        let detections = finalize_detections(candidates, true, &config, (384, 384));
        assert_eq!(detections.len(), 1);
        assert!((detections[0].bbox.right() - 384.0).abs() < 1e-3);
        assert!(detections[0].bbox.left() < 384.0);
    }
}
