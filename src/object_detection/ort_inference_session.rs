use crate::configs::config::{Architecture, ConfigError, DetectConfig};
use crate::object_detection::decoder::RawPrediction;
use ndarray::{Array2, Array3, ArrayD, ArrayView4, Axis, Ix2, Ix3};
use ort::inputs;
use ort::session::{Session, SessionOutputs};
use ort::value::TensorRef;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A set of custom errors for the model collaborator.
#[derive(Debug)]
pub enum ModelError {
    Session(ort::Error),
    MissingOutput(String),
    WrongRank {
        tensor: String,
        expected_ndim: usize,
        actual: Vec<usize>,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Session(e) => write!(f, "Inference session error: {}", e),
            ModelError::MissingOutput(name) => {
                write!(f, "Model produced no output named {:?}.", name)
            }
            ModelError::WrongRank {
                tensor,
                expected_ndim,
                actual,
            } => {
                write!(
                    f,
                    "Output {:?} has shape {:?}, expected a rank-{} tensor \
                     (optionally with a leading batch dimension of 1).",
                    tensor, actual, expected_ndim
                )
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl From<ort::Error> for ModelError {
    fn from(e: ort::Error) -> Self {
        ModelError::Session(e)
    }
}

/// Resolves the actual weights file from the checkpoint path and configured sub-key.
///
/// An empty sub-key uses the path as-is; the "model" sub-key selects the `model.onnx`
/// member of a checkpoint directory. Anything else is a fatal configuration error,
/// raised here rather than as a confusing file-not-found later.
pub fn resolve_checkpoint(path: &Path, checkpoint_key: &str) -> Result<PathBuf, ConfigError> {
    match checkpoint_key {
        "" => Ok(path.to_path_buf()),
        "model" => Ok(path.join("model.onnx")),
        other => Err(ConfigError::UnsupportedCheckpointKey(other.to_string())),
    }
}

/// An onnxruntime inference session.
pub struct OrtInferenceSession {
    session: Session,
}

impl OrtInferenceSession {
    pub fn new(model_path: &Path) -> Result<Self, ModelError> {
        let session = Session::builder()?.commit_from_file(model_path)?;
        Ok(Self { session })
    }

    /// Runs the network on one preprocessed image and pulls out the named outputs.
    fn run_and_extract(
        &mut self,
        input: ArrayView4<f32>,
        names: &[String],
    ) -> Result<Vec<ArrayD<f32>>, ModelError> {
        let outputs: SessionOutputs = self
            .session
            .run(inputs!["images" => TensorRef::from_array_view(input)?])?;
        names
            .iter()
            .map(|name| {
                let value = outputs
                    .get(name.as_str())
                    .ok_or_else(|| ModelError::MissingOutput(name.clone()))?;
                Ok(value.try_extract_array::<f32>()?.to_owned())
            })
            .collect()
    }
}

/// Defines the trait every model collaborator must follow.
///
/// The input is a single letterboxed image as a (1, 3, input, input) float view; the
/// output is the raw prediction layout of the configured architecture, ready for the
/// matching decoder.
pub trait DetectionModel {
    fn forward(&mut self, input: ArrayView4<f32>) -> Result<RawPrediction, ModelError>;
}

/// Builds the model collaborator for the configured architecture.
pub fn build_model(
    config: &DetectConfig,
    weights: &Path,
) -> Result<Box<dyn DetectionModel>, ModelError> {
    let session = OrtInferenceSession::new(weights)?;
    Ok(match config.arch.name {
        Architecture::Ssd => Box::new(SsdModel { session }),
        Architecture::Centernet => Box::new(CenterNetModel { session }),
        Architecture::Yolov3 | Architecture::Yolo7 => {
            let scales = config
                .arch
                .yolo
                .as_ref()
                .map(|section| section.strides.len())
                .unwrap_or(3);
            Box::new(YoloModel {
                session,
                head_names: (0..scales).map(|i| format!("head{}", i)).collect(),
            })
        }
    })
}

pub struct SsdModel {
    session: OrtInferenceSession,
}

impl DetectionModel for SsdModel {
    fn forward(&mut self, input: ArrayView4<f32>) -> Result<RawPrediction, ModelError> {
        let names = ["boxes".to_string(), "scores".to_string()];
        let mut outputs = self.session.run_and_extract(input, &names)?;
        let scores = to_dim2(outputs.pop().unwrap(), "scores")?;
        let boxes = to_dim2(outputs.pop().unwrap(), "boxes")?;
        debug!(default_boxes = boxes.nrows(), "ran ssd inference");
        Ok(RawPrediction::Ssd { boxes, scores })
    }
}

pub struct CenterNetModel {
    session: OrtInferenceSession,
}

impl DetectionModel for CenterNetModel {
    fn forward(&mut self, input: ArrayView4<f32>) -> Result<RawPrediction, ModelError> {
        let names = [
            "heatmap".to_string(),
            "offset".to_string(),
            "size".to_string(),
        ];
        let mut outputs = self.session.run_and_extract(input, &names)?;
        let size = to_dim3(outputs.pop().unwrap(), "size")?;
        let offset = to_dim3(outputs.pop().unwrap(), "offset")?;
        let heatmap = to_dim3(outputs.pop().unwrap(), "heatmap")?;
        debug!(classes = heatmap.shape()[0], "ran centernet inference");
        Ok(RawPrediction::CenterNet {
            heatmap,
            offset,
            size,
        })
    }
}

pub struct YoloModel {
    session: OrtInferenceSession,
    head_names: Vec<String>,
}

impl DetectionModel for YoloModel {
    fn forward(&mut self, input: ArrayView4<f32>) -> Result<RawPrediction, ModelError> {
        let outputs = self.session.run_and_extract(input, &self.head_names)?;
        let feature_maps = outputs
            .into_iter()
            .zip(&self.head_names)
            .map(|(output, name)| to_dim2(output, name))
            .collect::<Result<Vec<Array2<f32>>, ModelError>>()?;
        debug!(scales = feature_maps.len(), "ran yolo inference");
        Ok(RawPrediction::Yolo { feature_maps })
    }
}

/// Peels a leading batch dimension of 1, if present, down to the expected rank.
fn squeeze_batch(array: ArrayD<f32>, expected_ndim: usize) -> ArrayD<f32> {
    if array.ndim() == expected_ndim + 1 && array.shape()[0] == 1 {
        array.index_axis_move(Axis(0), 0)
    } else {
        array
    }
}

fn to_dim2(array: ArrayD<f32>, tensor: &str) -> Result<Array2<f32>, ModelError> {
    let shape = array.shape().to_vec();
    squeeze_batch(array, 2)
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::WrongRank {
            tensor: tensor.to_string(),
            expected_ndim: 2,
            actual: shape,
        })
}

fn to_dim3(array: ArrayD<f32>, tensor: &str) -> Result<Array3<f32>, ModelError> {
    let shape = array.shape().to_vec();
    squeeze_batch(array, 3)
        .into_dimensionality::<Ix3>()
        .map_err(|_| ModelError::WrongRank {
            tensor: tensor.to_string(),
            expected_ndim: 3,
            actual: shape,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn resolve_checkpoint_with_empty_key_is_the_path_itself() {
        let resolved = resolve_checkpoint(Path::new("saves/yolo7.onnx"), "").unwrap();
        assert_eq!(resolved, PathBuf::from("saves/yolo7.onnx"));
    }

    #[test]
    fn resolve_checkpoint_with_model_key_enters_the_directory() {
        let resolved = resolve_checkpoint(Path::new("saves/yolo7"), "model").unwrap();
        assert_eq!(resolved, PathBuf::from("saves/yolo7/model.onnx"));
    }

    #[test]
    fn resolve_checkpoint_rejects_unknown_keys() {
        assert!(matches!(
            resolve_checkpoint(Path::new("saves/yolo7.onnx"), "ema"),
            Err(ConfigError::UnsupportedCheckpointKey(_))
        ));
    }

    #[test]
    fn batched_outputs_are_squeezed() {
        let batched = Array::zeros((1, 8732, 4)).into_dyn();
        let boxes = to_dim2(batched, "boxes").unwrap();
        assert_eq!(boxes.dim(), (8732, 4));

        let unbatched = Array::zeros((8732, 4)).into_dyn();
        let boxes = to_dim2(unbatched, "boxes").unwrap();
        assert_eq!(boxes.dim(), (8732, 4));
    }

    #[test]
    fn wrong_rank_outputs_are_rejected() {
        let bad = Array::zeros((2, 8732, 4)).into_dyn();
        assert!(matches!(
            to_dim2(bad, "boxes"),
            Err(ModelError::WrongRank { .. })
        ));
    }
}
