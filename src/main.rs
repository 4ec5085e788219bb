mod annotations;
mod configs;
mod image_utils;
mod object_detection;

use crate::annotations::detection::Detection;
use crate::configs::config::{DetectConfig, ReadMode};
use crate::image_utils::drawing::draw_detections;
use crate::image_utils::image_conversion::convert_rgb_image_to_owned_array;
use crate::image_utils::image_io::read_image;
use crate::image_utils::letterbox::letter_box;
use crate::object_detection::decoder::{Decoder, decoder_for};
use crate::object_detection::object_detection_utils::non_maximum_suppression;
use crate::object_detection::ort_inference_session::{
    DetectionModel, build_model, resolve_checkpoint,
};
use clap::Parser;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Runs a detection model over images and decodes the raw outputs into boxes.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Experiment configure file name.
    #[arg(long, value_name = "FILE")]
    cfg: PathBuf,

    /// Checkpoint holding the model weights.
    #[arg(long, value_name = "FILE")]
    weights: PathBuf,

    /// Image file, or directory of images, to run detection on.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Print each detection to the console.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    print_on: bool,

    /// Draw boxes and save the rendering into the configured results directory.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    save_result: bool,

    /// Also dump the detections of every image as json next to the rendering.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    save_json: bool,
}

#[derive(Serialize)]
struct DetectionRecord<'a> {
    label: &'a str,
    #[serde(flatten)]
    detection: &'a Detection,
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

fn collect_image_paths(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(format!("No images found under {:?}.", input).into());
    }
    Ok(paths)
}

fn detect_one_image(
    config: &DetectConfig,
    model: &mut dyn DetectionModel,
    decoder: &dyn Decoder,
    class_names: &[String],
    mode: ReadMode,
    path: &Path,
    args: &Args,
) -> Result<Vec<Detection>, Box<dyn Error>> {
    let original = read_image(path, mode)?;
    let (h, w) = (original.height(), original.width());
    let input_size = config.arch.input_size;

    let (letterboxed, transform) = letter_box(&original, (input_size, input_size));
    debug!(
        scale = transform.scale,
        pad_top = transform.pad_top,
        pad_bottom = transform.pad_bottom,
        pad_left = transform.pad_left,
        pad_right = transform.pad_right,
        "letterboxed {}x{} into {}x{}",
        w,
        h,
        input_size,
        input_size
    );
    let tensor = convert_rgb_image_to_owned_array(&letterboxed);

    let raw = model.forward(tensor.view())?;
    let mut detections = decoder.decode(&raw, config, (h, w))?;
    if config.decode.use_nms {
        detections = non_maximum_suppression(detections, config.decode.nms_iou_threshold);
    }
    info!(
        "{}: {} detections",
        path.display(),
        detections.len()
    );

    if args.print_on {
        for detection in &detections {
            let label = class_names
                .get(detection.class_id)
                .map(String::as_str)
                .unwrap_or("unknown");
            println!("{} {:.2} {}", label, detection.score, detection.bbox);
        }
    }

    let file_stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    if args.save_result {
        let mut rendered = original;
        draw_detections(&mut rendered, &detections);
        let out_path = config
            .decode
            .test_results
            .join(format!("{}_result.png", file_stem));
        rendered.save(&out_path)?;
        debug!("saved rendering to {}", out_path.display());
    }
    if args.save_json {
        let records: Vec<DetectionRecord> = detections
            .iter()
            .map(|detection| DetectionRecord {
                label: class_names
                    .get(detection.class_id)
                    .map(String::as_str)
                    .unwrap_or("unknown"),
                detection,
            })
            .collect();
        let out_path = config
            .decode
            .test_results
            .join(format!("{}_result.json", file_stem));
        serde_json::to_writer_pretty(std::fs::File::create(&out_path)?, &records)?;
    }
    Ok(detections)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let started = Instant::now();
    let args = Args::parse();

    // All configuration problems surface here, before any image is touched.
    let config = DetectConfig::from_json_file(&args.cfg)?;
    let mode = config.image_mode()?;
    let class_names = config.class_names()?;
    let weights = resolve_checkpoint(&args.weights, &config.io.checkpoint_key)?;

    info!("Loading weights: {}", weights.display());
    let mut model = build_model(&config, &weights)?;
    let decoder = decoder_for(config.arch.name);

    let image_paths = collect_image_paths(&args.input)?;
    info!(
        "Running {} detection on {} image(s)",
        config.arch.name,
        image_paths.len()
    );
    if args.save_result || args.save_json {
        std::fs::create_dir_all(&config.decode.test_results)?;
    }

    for path in &image_paths {
        detect_one_image(
            &config,
            model.as_mut(),
            decoder.as_ref(),
            &class_names,
            mode,
            path,
            &args,
        )?;
    }

    info!("Total time: {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}
