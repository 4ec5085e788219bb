use crate::annotations::detection::Detection;
use crate::configs::config::{Architecture, DetectConfig};
use crate::object_detection::decoder::{
    Candidate, DecodeError, Decoder, RawPrediction, finalize_detections,
};
use itertools::iproduct;

/// Decodes YOLOv7 grid-cell anchor predictions into detections.
///
/// Same tensor layout as YOLOv3 but with the v5/v7 box parameterization, which keeps
/// the center inside a slightly widened cell and bounds the size growth instead of
/// using an unbounded exponential:
///
///   bx = (2 * sigmoid(tx) - 0.5 + cx) * stride      bw = (2 * sigmoid(tw))^2 * anchor_w
///   by = (2 * sigmoid(ty) - 0.5 + cy) * stride      bh = (2 * sigmoid(th))^2 * anchor_h
///
/// The detection score is sigmoid(objectness) * sigmoid(best class logit).
pub struct Yolo7Decoder;

impl Decoder for Yolo7Decoder {
    fn decode(
        &self,
        raw: &RawPrediction,
        config: &DetectConfig,
        original_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError> {
        let RawPrediction::Yolo { feature_maps } = raw else {
            return Err(DecodeError::WrongPredictionKind {
                decoder: Architecture::Yolo7,
            });
        };
        let section = config
            .arch
            .yolo
            .as_ref()
            .ok_or(DecodeError::MissingArchSection(Architecture::Yolo7))?;
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
                let bx = (2.0 * sigmoid(row[0]) - 0.5 + x as f32) * stride as f32;
                let by = (2.0 * sigmoid(row[1]) - 0.5 + y as f32) * stride as f32;
                let bw = (2.0 * sigmoid(row[2])).powi(2) * anchor[0];
                let bh = (2.0 * sigmoid(row[3])).powi(2) * anchor[1];
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
