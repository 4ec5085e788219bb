use crate::annotations::detection::Detection;
use crate::configs::config::{Architecture, DetectConfig, SsdConfig};
use crate::object_detection::decoder::{
    Candidate, DecodeError, Decoder, RawPrediction, finalize_detections,
};
use itertools::iproduct;

/// Decodes SSD default-box offsets into detections.
///
/// The network regresses every default box with the standard box-offset
/// parameterization: the center offset is scaled by the center variance and the
/// default box size, the size is an exponential scale damped by the size variance:
///
///   cx = loc_x * var_center * prior_w + prior_cx      w = prior_w * exp(loc_w * var_size)
///   cy = loc_y * var_center * prior_h + prior_cy      h = prior_h * exp(loc_h * var_size)
///
/// Default boxes live in [0, 1] relative to the letterboxed input, so the decoded
/// centers and sizes feed the letterbox inversion directly.
pub struct SsdDecoder;

impl Decoder for SsdDecoder {
    fn decode(
        &self,
        raw: &RawPrediction,
        config: &DetectConfig,
        original_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError> {
        let RawPrediction::Ssd { boxes, scores } = raw else {
            return Err(DecodeError::WrongPredictionKind {
                decoder: Architecture::Ssd,
            });
        };
        let section = config
            .arch
            .ssd
            .as_ref()
            .ok_or(DecodeError::MissingArchSection(Architecture::Ssd))?;
        let priors = generate_default_boxes(section);
        let num_classes = config.arch.num_classes;
        if boxes.dim() != (priors.len(), 4) {
            return Err(DecodeError::ShapeMismatch {
                tensor: "boxes",
                expected: format!("({}, 4)", priors.len()),
                actual: boxes.shape().to_vec(),
            });
        }
        if scores.dim() != (priors.len(), num_classes) {
            return Err(DecodeError::ShapeMismatch {
                tensor: "scores",
                expected: format!("({}, {})", priors.len(), num_classes),
                actual: scores.shape().to_vec(),
            });
        }

        let [var_center, var_size] = section.variances;
        let mut candidates = Vec::new();
        for (index, prior) in priors.iter().enumerate() {
            let row = scores.row(index);
            let (class_id, score) = row
                .iter()
                .enumerate()
                .map(|(class, value)| (class, *value))
                .reduce(|accum, entry| if entry.1 > accum.1 { entry } else { accum })
                .unwrap();
            if score < config.decode.score_threshold {
                continue;
            }
            let loc = boxes.row(index);
            let cx = loc[0] * var_center * prior[2] + prior[0];
            let cy = loc[1] * var_center * prior[3] + prior[1];
            let w = prior[2] * (loc[2] * var_size).exp();
            let h = prior[3] * (loc[3] * var_size).exp();
            candidates.push(Candidate {
                bbox: [cx, cy, w, h],
                score,
                class_id,
            });
        }
        Ok(finalize_detections(candidates, true, config, original_size))
    }
}

/// Tiles default boxes over every feature map, center-form and normalized to [0, 1].
///
/// Feature map k gets the scale s_k interpolated between min_scale and max_scale. Each
/// cell receives a square box at s_k, a square box at sqrt(s_k * s_{k+1}), and one box
/// per configured extra aspect ratio with width s_k * sqrt(ar) and height
/// s_k / sqrt(ar).
pub(crate) fn generate_default_boxes(section: &SsdConfig) -> Vec<[f32; 4]> {
    let map_count = section.feature_map_sizes.len();
    let scale_at = |k: usize| -> f32 {
        if map_count == 1 {
            section.min_scale
        } else {
            section.min_scale
                + (section.max_scale - section.min_scale) * k as f32 / (map_count - 1) as f32
        }
    };

    let mut priors = Vec::new();
    for (k, &map_size) in section.feature_map_sizes.iter().enumerate() {
        let scale = scale_at(k);
        let next_scale = if k + 1 < map_count { scale_at(k + 1) } else { 1.0 };
        let between_scale = (scale * next_scale).sqrt();
        for (i, j) in iproduct!(0..map_size, 0..map_size) {
            let cx = (j as f32 + 0.5) / map_size as f32;
            let cy = (i as f32 + 0.5) / map_size as f32;
            priors.push([cx, cy, scale, scale]);
            priors.push([cx, cy, between_scale, between_scale]);
            for &ratio in &section.aspect_ratios[k] {
                priors.push([cx, cy, scale * ratio.sqrt(), scale / ratio.sqrt()]);
            }
        }
    }
    priors
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn tiny_ssd_config() -> DetectConfig {
        serde_json::from_str(
            r#"{
                "arch": {
                    "name": "ssd",
                    "num_classes": 20,
                    "input_size": 300,
                    "ssd": {
                        "feature_map_sizes": [1],
                        "min_scale": 0.5,
                        "max_scale": 0.5,
                        "aspect_ratios": [[]],
                        "variances": [0.1, 0.2]
                    }
                },
                "dataset": { "name": "voc" },
                "decode": { "score_threshold": 0.6, "nms_iou_threshold": 0.5 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn prior_count_follows_the_tiling() {
        let section = SsdConfig {
            feature_map_sizes: vec![2, 1],
            min_scale: 0.2,
            max_scale: 0.9,
            aspect_ratios: vec![vec![2.0, 0.5], vec![]],
            variances: [0.1, 0.2],
        };
        // 2x2 cells with (2 + 2) boxes each, then 1 cell with 2 boxes.
        assert_eq!(generate_default_boxes(&section).len(), 4 * 4 + 2);
    }

    #[test]
    fn zero_offsets_return_the_default_box() {
        let config = tiny_ssd_config();
        let boxes = Array2::zeros((2, 4));
        let mut scores = Array2::zeros((2, 20));
        scores[[0, 7]] = 0.9;
        let raw = RawPrediction::Ssd { boxes, scores };

        // The first prior is (0.5, 0.5, 0.5, 0.5); on a square 300x300 original the
        // letterbox inversion is the identity, so the box is (75, 75, 225, 225).
        let detections = SsdDecoder.decode(&raw, &config, (300, 300)).unwrap();
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.class_id, 7);
        assert!((detection.score - 0.9).abs() < 1e-6);
        assert!((detection.bbox.left() - 75.0).abs() < 1e-3);
        assert!((detection.bbox.top() - 75.0).abs() < 1e-3);
        assert!((detection.bbox.right() - 225.0).abs() < 1e-3);
        assert!((detection.bbox.bottom() - 225.0).abs() < 1e-3);
    }

    #[test]
    fn center_offset_is_scaled_by_variance_and_prior_size() {
        let config = tiny_ssd_config();
        let mut boxes = Array2::zeros((2, 4));
        boxes[[0, 0]] = 1.0;
        let mut scores = Array2::zeros((2, 20));
        scores[[0, 0]] = 0.9;
        let raw = RawPrediction::Ssd { boxes, scores };

        // cx = 1.0 * 0.1 * 0.5 + 0.5 = 0.55, so the box shifts right by 15 pixels.
        let detections = SsdDecoder.decode(&raw, &config, (300, 300)).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].bbox.left() - 90.0).abs() < 1e-3);
        assert!((detections[0].bbox.right() - 240.0).abs() < 1e-3);
    }

    #[test]
    fn size_offset_is_exponential() {
        let config = tiny_ssd_config();
        let mut boxes = Array2::zeros((2, 4));
        boxes[[0, 2]] = 1.0;
        let mut scores = Array2::zeros((2, 20));
        scores[[0, 0]] = 0.9;
        let raw = RawPrediction::Ssd { boxes, scores };

        // w = 0.5 * exp(1.0 * 0.2) = 0.61070, so width grows to 183.21 pixels.
        let detections = SsdDecoder.decode(&raw, &config, (300, 300)).unwrap();
        assert_eq!(detections.len(), 1);
        let width = detections[0].bbox.width();
        assert!((width - 183.21).abs() < 0.05);
    }

    #[test]
    fn prediction_shape_must_match_the_prior_count() {
        let config = tiny_ssd_config();
        let raw = RawPrediction::Ssd {
            boxes: Array2::zeros((3, 4)),
            scores: Array2::zeros((3, 20)),
        };
        assert!(matches!(
            SsdDecoder.decode(&raw, &config, (300, 300)),
            Err(DecodeError::ShapeMismatch { tensor: "boxes", .. })
        ));
    }
}
