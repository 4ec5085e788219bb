use crate::annotations::detection::Detection;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Reads a file with the class names into a vector so that the number ids
/// which come out of the decoders can be given meaning.
pub fn read_classes_txt_file(filepath: &Path) -> io::Result<Vec<String>> {
    BufReader::new(File::open(filepath)?).lines().collect()
}

/// Non maximum suppression is a way of removing duplicate detections.
///
/// Per class, the highest-scoring box is kept and every other box overlapping it with
/// IoU at or above the threshold is discarded, repeating over what remains. The sort is
/// stable and ties keep their original order, so the result is deterministic. Running
/// the suppression on its own output changes nothing.
pub fn non_maximum_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    let mut detections_to_remove: Vec<bool> = vec![false; detections.len()];
    for (current_index, current_det) in detections.iter().enumerate() {
        // Only kept boxes may suppress; a suppressed box has no say anymore.
        if detections_to_remove[current_index] {
            continue;
        }
        for (other_index, other_det) in detections[current_index + 1..].iter().enumerate() {
            if detections_to_remove[current_index + other_index + 1] {
                continue;
            }
            if current_det.class_id != other_det.class_id {
                continue;
            }
            let iou = current_det.bbox.intersection_over_union(&other_det.bbox);
            if iou >= iou_threshold {
                detections_to_remove[current_index + other_index + 1] = true;
            }
        }
    }
    let mut drop_iter = detections_to_remove.iter();
    detections.retain(|_| !drop_iter.next().unwrap());
    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::bounding_box::BoundingBox;

    fn detection(left: f32, top: f32, right: f32, bottom: f32, score: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BoundingBox::new(left, top, right, bottom).unwrap(),
            score,
            class_id,
        }
    }

    #[test]
    fn nms_no_overlap() {
        let dets = vec![
            detection(0.0, 0.0, 1.0, 1.0, 0.6, 0),
            detection(2.0, 2.0, 3.0, 3.0, 0.6, 0),
        ];
        let nms_result = non_maximum_suppression(dets.clone(), 0.5);
        assert_eq!(nms_result, dets);
    }

    #[test]
    fn nms_standard_usage() {
        let dets = vec![
            detection(0.0, 0.0, 4.0, 4.0, 0.6, 0),
            detection(0.0, 0.0, 5.0, 5.0, 0.55, 0),
            detection(6.0, 6.0, 10.0, 10.0, 0.75, 0),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![
            detection(6.0, 6.0, 10.0, 10.0, 0.75, 0),
            detection(0.0, 0.0, 4.0, 4.0, 0.6, 0),
        ];
        assert_eq!(nms_result, true_dets);
    }

    #[test]
    fn nms_overlap_but_different_classes() {
        let dets = vec![
            detection(0.0, 0.0, 4.5, 4.5, 0.6, 0),
            detection(0.0, 0.0, 5.0, 5.0, 0.55, 1),
            detection(0.5, 0.5, 4.0, 4.0, 0.8, 0),
            detection(6.0, 6.0, 10.0, 10.0, 0.75, 0),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![
            detection(0.5, 0.5, 4.0, 4.0, 0.8, 0),
            detection(6.0, 6.0, 10.0, 10.0, 0.75, 0),
            detection(0.0, 0.0, 5.0, 5.0, 0.55, 1),
        ];
        assert_eq!(nms_result, true_dets);
    }

    #[test]
    fn identical_boxes_keep_only_the_higher_score() {
        let dets = vec![
            detection(10.0, 10.0, 20.0, 20.0, 0.8, 2),
            detection(10.0, 10.0, 20.0, 20.0, 0.9, 2),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        assert_eq!(nms_result, vec![detection(10.0, 10.0, 20.0, 20.0, 0.9, 2)]);
    }

    #[test]
    fn suppressed_boxes_do_not_suppress_others() {
        // A suppresses B; B overlaps C but A does not, so C must survive.
        let dets = vec![
            detection(0.0, 0.0, 4.0, 4.0, 0.9, 0),
            detection(2.0, 0.0, 6.0, 4.0, 0.8, 0),
            detection(4.0, 0.0, 8.0, 4.0, 0.7, 0),
        ];
        let nms_result = non_maximum_suppression(dets, 0.3);
        let true_dets = vec![
            detection(0.0, 0.0, 4.0, 4.0, 0.9, 0),
            detection(4.0, 0.0, 8.0, 4.0, 0.7, 0),
        ];
        assert_eq!(nms_result, true_dets);
    }

    #[test]
    fn nms_is_idempotent() {
        let dets = vec![
            detection(0.0, 0.0, 4.0, 4.0, 0.6, 0),
            detection(0.0, 0.0, 5.0, 5.0, 0.55, 0),
            detection(6.0, 6.0, 10.0, 10.0, 0.75, 1),
            detection(6.5, 6.5, 10.0, 10.0, 0.7, 1),
        ];
        let once = non_maximum_suppression(dets, 0.5);
        let twice = non_maximum_suppression(once.clone(), 0.5);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_is_a_valid_result() {
        let nms_result = non_maximum_suppression(Vec::new(), 0.5);
        assert!(nms_result.is_empty());
    }
}
