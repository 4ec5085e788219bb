pub mod centernet;
pub mod decoder;
pub mod object_detection_utils;
pub mod ort_inference_session;
pub mod ssd;
pub mod yolov3;
pub mod yolov7;
