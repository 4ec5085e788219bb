use crate::annotations::detection::Detection;
use crate::configs::config::{Architecture, DetectConfig};
use crate::object_detection::decoder::{
    Candidate, DecodeError, Decoder, RawPrediction, finalize_detections,
};
use ndarray::Array3;

/// Decodes CenterNet keypoint heatmaps into detections.
///
/// Object centers appear as local maxima in the per-class heatmap at 1/r of the input
/// resolution. Each peak location carries a sub-pixel offset and a box size in heatmap
/// cells; scaling all three by the downsampling ratio reconstructs the box in
/// network-input pixels.
pub struct CenterNetDecoder;

impl Decoder for CenterNetDecoder {
    fn decode(
        &self,
        raw: &RawPrediction,
        config: &DetectConfig,
        original_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError> {
        let RawPrediction::CenterNet {
            heatmap,
            offset,
            size,
        } = raw
        else {
            return Err(DecodeError::WrongPredictionKind {
                decoder: Architecture::Centernet,
            });
        };
        let section = config
            .arch
            .centernet
            .as_ref()
            .ok_or(DecodeError::MissingArchSection(Architecture::Centernet))?;
        let ratio = section.downsampling_ratio as f32;
        let feature = (config.arch.input_size / section.downsampling_ratio) as usize;
        let num_classes = config.arch.num_classes;

        if heatmap.dim() != (num_classes, feature, feature) {
            return Err(DecodeError::ShapeMismatch {
                tensor: "heatmap",
                expected: format!("({}, {}, {})", num_classes, feature, feature),
                actual: heatmap.shape().to_vec(),
            });
        }
        for (tensor, name) in [(offset, "offset"), (size, "size")] {
            if tensor.dim() != (2, feature, feature) {
                return Err(DecodeError::ShapeMismatch {
                    tensor: name,
                    expected: format!("(2, {}, {})", feature, feature),
                    actual: tensor.shape().to_vec(),
                });
            }
        }

        let input = config.arch.input_size as f32;
        let mut candidates = Vec::new();
        for class_id in 0..num_classes {
            for y in 0..feature {
                for x in 0..feature {
                    let score = heatmap[[class_id, y, x]];
                    if score < config.decode.score_threshold {
                        continue;
                    }
                    if !is_local_peak(heatmap, class_id, y, x) {
                        continue;
                    }
                    let center_x = (x as f32 + offset[[0, y, x]]) * ratio;
                    let center_y = (y as f32 + offset[[1, y, x]]) * ratio;
                    let box_w = size[[0, y, x]] * ratio;
                    let box_h = size[[1, y, x]] * ratio;
                    candidates.push(Candidate {
                        bbox: [
                            center_x / input,
                            center_y / input,
                            box_w / input,
                            box_h / input,
                        ],
                        score,
                        class_id,
                    });
                }
            }
        }
        Ok(finalize_detections(candidates, true, config, original_size))
    }
}

/// Explicit 3x3 neighborhood maximum test over one class plane.
///
/// A cell is a peak when no in-bounds 8-neighbor is strictly greater; equal neighbors
/// keep both cells, the same tie behavior as a stride-1 max filter.
fn is_local_peak(heatmap: &Array3<f32>, class_id: usize, y: usize, x: usize) -> bool {
    let (_, height, width) = heatmap.dim();
    let score = heatmap[[class_id, y, x]];
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dy == 0 && dx == 0 {
                continue;
            }
            let ny = y as i64 + dy;
            let nx = x as i64 + dx;
            if ny < 0 || nx < 0 || ny >= height as i64 || nx >= width as i64 {
                continue;
            }
            if heatmap[[class_id, ny as usize, nx as usize]] > score {
                return false;
            }
        }
    }
    true
}
