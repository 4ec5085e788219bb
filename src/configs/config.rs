use crate::configs::dataset::{COCO_CLASSES, VOC_CLASSES};
use crate::object_detection::object_detection_utils::read_classes_txt_file;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The detection architectures this project can decode.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Ssd,
    Centernet,
    Yolov3,
    Yolo7,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::Ssd => "ssd",
            Architecture::Centernet => "centernet",
            Architecture::Yolov3 => "yolov3",
            Architecture::Yolo7 => "yolo7",
        };
        write!(f, "{}", name)
    }
}

/// Channel order an image is read in before preprocessing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadMode {
    Rgb,
    Bgr,
    Gray,
}

impl FromStr for ReadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb" => Ok(ReadMode::Rgb),
            "bgr" => Ok(ReadMode::Bgr),
            "gray" => Ok(ReadMode::Gray),
            other => Err(ConfigError::InvalidImageMode(other.to_string())),
        }
    }
}

/// A set of custom errors for configuration loading and validation.
///
/// Every variant is fatal: configuration problems are surfaced before any image is
/// processed, never worked around.
#[derive(Debug)]
pub enum ConfigError {
    InvalidImageMode(String),
    UnsupportedCheckpointKey(String),
    UnknownDataset(String),
    MissingArchSection(Architecture),
    InvalidArchSection {
        architecture: Architecture,
        reason: String,
    },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidImageMode(mode) => {
                write!(
                    f,
                    "Invalid image mode {:?}, mode must be one of \"rgb\", \"bgr\", \"gray\".",
                    mode
                )
            }
            ConfigError::UnsupportedCheckpointKey(key) => {
                write!(
                    f,
                    "Unsupported checkpoint sub-key {:?}, expected \"\" or \"model\".",
                    key
                )
            }
            ConfigError::UnknownDataset(name) => {
                write!(
                    f,
                    "Unknown dataset {:?} and no classes file was configured.",
                    name
                )
            }
            ConfigError::MissingArchSection(architecture) => {
                write!(
                    f,
                    "Config selects architecture {} but has no matching section.",
                    architecture
                )
            }
            ConfigError::InvalidArchSection {
                architecture,
                reason,
            } => {
                write!(f, "Invalid {} section: {}", architecture, reason)
            }
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// CenterNet-specific settings.
#[derive(Clone, Debug, Deserialize)]
pub struct CenterNetConfig {
    /// Ratio between the network input resolution and the heatmap resolution.
    pub downsampling_ratio: u32,
}

/// Settings shared by the YOLO family decoders.
#[derive(Clone, Debug, Deserialize)]
pub struct YoloConfig {
    /// Anchor templates as (width, height) in network-input pixels.
    pub anchors: Vec<[f32; 2]>,
    /// Per detection scale, the indices into `anchors` used at that scale.
    pub anchor_masks: Vec<Vec<usize>>,
    /// Per detection scale, the stride between neighboring grid cells.
    pub strides: Vec<u32>,
}

/// Settings for generating SSD default boxes and undoing its offset encoding.
#[derive(Clone, Debug, Deserialize)]
pub struct SsdConfig {
    /// Spatial size of each square feature map, largest first.
    pub feature_map_sizes: Vec<usize>,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Per feature map, the aspect ratios beyond the two ratio-1 boxes.
    pub aspect_ratios: Vec<Vec<f32>>,
    /// Center and size variances of the offset parameterization.
    pub variances: [f32; 2],
}

#[derive(Clone, Debug, Deserialize)]
pub struct ArchConfig {
    pub name: Architecture,
    pub num_classes: usize,
    /// Square network input resolution in pixels.
    pub input_size: u32,
    pub centernet: Option<CenterNetConfig>,
    pub yolo: Option<YoloConfig>,
    pub ssd: Option<SsdConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name, "voc" or "coco". Any other name requires `classes_file`.
    pub name: String,
    #[serde(default)]
    pub classes_file: Option<PathBuf>,
}

fn default_use_nms() -> bool {
    true
}

fn default_max_boxes_per_img() -> usize {
    100
}

fn default_test_results() -> PathBuf {
    PathBuf::from("result")
}

#[derive(Clone, Debug, Deserialize)]
pub struct DecodeConfig {
    pub score_threshold: f32,
    pub nms_iou_threshold: f32,
    #[serde(default = "default_use_nms")]
    pub use_nms: bool,
    #[serde(default = "default_max_boxes_per_img")]
    pub max_boxes_per_img: usize,
    /// Directory detection renderings are saved into.
    #[serde(default = "default_test_results")]
    pub test_results: PathBuf,
}

fn default_image_mode() -> String {
    "rgb".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_image_mode")]
    pub image_mode: String,
    /// Sub-key the weights live under inside the checkpoint, "" or "model".
    #[serde(default)]
    pub checkpoint_key: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            image_mode: default_image_mode(),
            checkpoint_key: String::new(),
        }
    }
}

/// The immutable configuration passed explicitly into every decode call.
#[derive(Clone, Debug, Deserialize)]
pub struct DetectConfig {
    pub arch: ArchConfig,
    pub dataset: DatasetConfig,
    pub decode: DecodeConfig,
    #[serde(default)]
    pub io: IoConfig,
}

impl DetectConfig {
    /// Loads a config from a json file and validates it.
    pub fn from_json_file(filepath: &Path) -> Result<DetectConfig, ConfigError> {
        let reader = BufReader::new(File::open(filepath)?);
        let config: DetectConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates everything that must hold before any image is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.image_mode()?;
        match self.io.checkpoint_key.as_str() {
            "" | "model" => {}
            other => return Err(ConfigError::UnsupportedCheckpointKey(other.to_string())),
        }
        if self.arch.num_classes == 0 {
            return Err(ConfigError::InvalidArchSection {
                architecture: self.arch.name,
                reason: "num_classes must be positive".to_string(),
            });
        }
        match self.arch.name {
            Architecture::Centernet => {
                let section = self
                    .arch
                    .centernet
                    .as_ref()
                    .ok_or(ConfigError::MissingArchSection(self.arch.name))?;
                if section.downsampling_ratio == 0
                    || self.arch.input_size % section.downsampling_ratio != 0
                {
                    return Err(ConfigError::InvalidArchSection {
                        architecture: self.arch.name,
                        reason: format!(
                            "downsampling_ratio {} must evenly divide input_size {}",
                            section.downsampling_ratio, self.arch.input_size
                        ),
                    });
                }
            }
            Architecture::Yolov3 | Architecture::Yolo7 => {
                let section = self
                    .arch
                    .yolo
                    .as_ref()
                    .ok_or(ConfigError::MissingArchSection(self.arch.name))?;
                if section.anchor_masks.len() != section.strides.len() {
                    return Err(ConfigError::InvalidArchSection {
                        architecture: self.arch.name,
                        reason: format!(
                            "{} anchor masks but {} strides",
                            section.anchor_masks.len(),
                            section.strides.len()
                        ),
                    });
                }
                for mask in &section.anchor_masks {
                    if let Some(&index) = mask.iter().find(|&&i| i >= section.anchors.len()) {
                        return Err(ConfigError::InvalidArchSection {
                            architecture: self.arch.name,
                            reason: format!(
                                "anchor mask references anchor {} but only {} anchors are defined",
                                index,
                                section.anchors.len()
                            ),
                        });
                    }
                }
                if let Some(&stride) = section
                    .strides
                    .iter()
                    .find(|&&s| s == 0 || self.arch.input_size % s != 0)
                {
                    return Err(ConfigError::InvalidArchSection {
                        architecture: self.arch.name,
                        reason: format!(
                            "stride {} must evenly divide input_size {}",
                            stride, self.arch.input_size
                        ),
                    });
                }
            }
            Architecture::Ssd => {
                let section = self
                    .arch
                    .ssd
                    .as_ref()
                    .ok_or(ConfigError::MissingArchSection(self.arch.name))?;
                if section.feature_map_sizes.len() != section.aspect_ratios.len() {
                    return Err(ConfigError::InvalidArchSection {
                        architecture: self.arch.name,
                        reason: format!(
                            "{} feature maps but {} aspect ratio lists",
                            section.feature_map_sizes.len(),
                            section.aspect_ratios.len()
                        ),
                    });
                }
                if section.feature_map_sizes.is_empty() {
                    return Err(ConfigError::InvalidArchSection {
                        architecture: self.arch.name,
                        reason: "feature_map_sizes must not be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn image_mode(&self) -> Result<ReadMode, ConfigError> {
        self.io.image_mode.parse()
    }

    /// Resolves the class name list for the configured dataset.
    pub fn class_names(&self) -> Result<Vec<String>, ConfigError> {
        match self.dataset.name.as_str() {
            "voc" => Ok(VOC_CLASSES.iter().map(|c| c.to_string()).collect()),
            "coco" => Ok(COCO_CLASSES.iter().map(|c| c.to_string()).collect()),
            other => match &self.dataset.classes_file {
                Some(path) => Ok(read_classes_txt_file(path)?),
                None => Err(ConfigError::UnknownDataset(other.to_string())),
            },
        }
    }
}
