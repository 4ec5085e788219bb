use crate::annotations::detection::Detection;
use crate::configs::config::{Architecture, DetectConfig};
use crate::object_detection::decoder::{
    Candidate, DecodeError, Decoder, RawPrediction, finalize_detections,
};
use itertools::iproduct;

/// Decodes YOLOv3 grid-cell anchor predictions into detections.
///
/// Each detection scale predicts, for every anchor at every grid cell, a raw
/// (tx, ty, tw, th, objectness) tuple followed by one logit per class. The center
/// offsets pass through a sigmoid and are added to the cell index; width and height
/// scale the anchor template exponentially:
///
///   bx = (sigmoid(tx) + cx) * stride      bw = anchor_w * exp(tw)
///   by = (sigmoid(ty) + cy) * stride      bh = anchor_h * exp(th)
///
/// The detection score is sigmoid(objectness) * sigmoid(best class logit).
pub struct YoloV3Decoder;

impl Decoder for YoloV3Decoder {
    fn decode(
        &self,
        raw: &RawPrediction,
        config: &DetectConfig,
        original_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError> {
        let RawPrediction::Yolo { feature_maps } = raw else {
            return Err(DecodeError::WrongPredictionKind {
                decoder: Architecture::Yolov3,
            });
        };
        let section = config
            .arch
            .yolo
            .as_ref()
            .ok_or(DecodeError::MissingArchSection(Architecture::Yolov3))?;
        if feature_maps.len() != section.strides.len() {
            return Err(DecodeError::ShapeMismatch {
                tensor: "feature_maps",
                expected: format!("{} detection scales", section.strides.len()),
                actual: vec![feature_maps.len()],
            });
        }

        let input = config.arch.input_size as f32;
        let num_classes = config.arch.num_classes;
        let mut candidates = Vec::new();
        for (scale, feature_map) in feature_maps.iter().enumerate() {
            let stride = section.strides[scale];
            let grid = (config.arch.input_size / stride) as usize;
            let mask = &section.anchor_masks[scale];
            if feature_map.dim() != (mask.len() * grid * grid, 5 + num_classes) {
                return Err(DecodeError::ShapeMismatch {
                    tensor: "feature_map",
                    expected: format!("({}, {})", mask.len() * grid * grid, 5 + num_classes),
                    actual: feature_map.shape().to_vec(),
                });
            }
            for (a, y, x) in iproduct!(0..mask.len(), 0..grid, 0..grid) {
                let row = feature_map.row(a * grid * grid + y * grid + x);
                // Sigmoid is monotonic, so the best class can be picked on raw logits.
                let (class_id, class_logit) = row
                    .iter()
                    .skip(5)
                    .enumerate()
                    .map(|(index, value)| (index, *value))
                    .reduce(|accum, entry| if entry.1 > accum.1 { entry } else { accum })
                    .unwrap();
                let score = sigmoid(row[4]) * sigmoid(class_logit);
                if score < config.decode.score_threshold {
                    continue;
                }
                let anchor = section.anchors[mask[a]];
                let bx = (sigmoid(row[0]) + x as f32) * stride as f32;
                let by = (sigmoid(row[1]) + y as f32) * stride as f32;
                let bw = anchor[0] * row[2].exp();
                let bh = anchor[1] * row[3].exp();
                candidates.push(Candidate {
                    bbox: [bx / input, by / input, bw / input, bh / input],
                    score,
                    class_id,
                });
            }
        }
        Ok(finalize_detections(candidates, true, config, original_size))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn single_scale_config(score_threshold: f32) -> DetectConfig {
        let json = format!(
            r#"{{
                "arch": {{
                    "name": "yolov3",
                    "num_classes": 80,
                    "input_size": 416,
                    "yolo": {{
                        "anchors": [[116, 90]],
                        "anchor_masks": [[0]],
                        "strides": [32]
                    }}
                }},
                "dataset": {{ "name": "coco" }},
                "decode": {{ "score_threshold": {}, "nms_iou_threshold": 0.5 }}
            }}"#,
            score_threshold
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn zero_offsets_center_the_anchor_in_its_cell() {
        let config = single_scale_config(0.5);
        let mut feature_map = Array2::zeros((13 * 13, 85));
        let row = 6 * 13 + 6;
        feature_map[[row, 4]] = 10.0;
        feature_map[[row, 5]] = 10.0;
        let raw = RawPrediction::Yolo {
            feature_maps: vec![feature_map],
        };

        // sigmoid(0) = 0.5 puts the center at (6.5 * 32, 6.5 * 32) = (208, 208), and
        // exp(0) = 1 keeps the 116x90 anchor size. All-zero rows score
        // sigmoid(0)^2 = 0.25 and fall below the 0.5 threshold.
        let detections = YoloV3Decoder.decode(&raw, &config, (416, 416)).unwrap();
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.class_id, 0);
        assert!(detection.score > 0.99);
        assert!((detection.bbox.left() - 150.0).abs() < 1e-2);
        assert!((detection.bbox.top() - 163.0).abs() < 1e-2);
        assert!((detection.bbox.right() - 266.0).abs() < 1e-2);
        assert!((detection.bbox.bottom() - 253.0).abs() < 1e-2);
    }

    #[test]
    fn best_class_wins() {
        let config = single_scale_config(0.5);
        let mut feature_map = Array2::zeros((13 * 13, 85));
        let row = 3 * 13 + 9;
        feature_map[[row, 4]] = 10.0;
        feature_map[[row, 5 + 17]] = 4.0;
        feature_map[[row, 5 + 41]] = 9.0;
        let raw = RawPrediction::Yolo {
            feature_maps: vec![feature_map],
        };
        let detections = YoloV3Decoder.decode(&raw, &config, (416, 416)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 41);
    }

    #[test]
    fn candidate_cap_keeps_the_highest_scoring() {
        let mut config = single_scale_config(0.0);
        config.decode.max_boxes_per_img = 100;
        // Every one of the 169 cells scores above the (zero) threshold with a
        // distinct objectness, so the cap must keep the top 100.
        let mut feature_map = Array2::zeros((13 * 13, 85));
        for row in 0..169 {
            feature_map[[row, 4]] = row as f32 * 0.05;
            feature_map[[row, 5]] = 10.0;
        }
        let raw = RawPrediction::Yolo {
            feature_maps: vec![feature_map],
        };
        let detections = YoloV3Decoder.decode(&raw, &config, (416, 416)).unwrap();
        assert_eq!(detections.len(), 100);
        let lowest_kept = detections
            .iter()
            .map(|d| d.score)
            .fold(f32::INFINITY, f32::min);
        let highest_dropped = sigmoid(68.0 * 0.05) * sigmoid(10.0);
        assert!(lowest_kept > highest_dropped);
    }

    #[test]
    fn feature_map_shape_mismatch_is_fatal() {
        let config = single_scale_config(0.5);
        let raw = RawPrediction::Yolo {
            feature_maps: vec![Array2::zeros((13 * 13, 84))],
        };
        assert!(matches!(
            YoloV3Decoder.decode(&raw, &config, (416, 416)),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn scale_count_mismatch_is_fatal() {
        let config = single_scale_config(0.5);
        let raw = RawPrediction::Yolo {
            feature_maps: vec![
                Array2::zeros((13 * 13, 85)),
                Array2::zeros((26 * 26, 85)),
            ],
        };
        assert!(matches!(
            YoloV3Decoder.decode(&raw, &config, (416, 416)),
            Err(DecodeError::ShapeMismatch { .. })
        ));
    }
}
