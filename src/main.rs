mod detection;
mod logs;
mod overlay;
mod pipeline;
mod video;
mod yolo;

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

use crate::logs::{EventLog, LabelLog, SessionInfo, DEFAULT_LABEL_LOG};
use crate::pipeline::Pipeline;
use crate::video::{open_display, Capture, VideoSource};
use crate::yolo::{Device, YoloDetector, DEFAULT_CONF, DEFAULT_IOU};

const WINDOW_NAME: &str = "ESP Detection";

#[derive(Parser, Debug)]
#[command(name = "roadcount", about = "YOLOv8 person and vehicle detection and counting")]
struct Args {
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "camera",
        default_value = "The Fate of the Furious ｜ Harpooning Dom's Car.mp4"
    )]
    file: String,
    /// Read from a local camera instead of a file
    #[arg(long, value_name = "INDEX")]
    camera: Option<i32>,
    /// YOLOv8 ONNX export
    #[arg(long, default_value = "yolov8n.onnx")]
    model: PathBuf,
    #[arg(long, value_enum, default_value_t = Device::Cuda)]
    device: Device,
    #[arg(long, default_value_t = DEFAULT_CONF)]
    conf: f32,
    /// NMS overlap threshold
    #[arg(long, default_value_t = DEFAULT_IOU)]
    iou: f32,
    #[arg(long, default_value = DEFAULT_LABEL_LOG)]
    log_file: PathBuf,
    #[arg(long)]
    log_json: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    log_interval_seconds: u64,
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn source(&self) -> VideoSource {
        match self.camera {
            Some(index) => VideoSource::Camera(index),
            None => VideoSource::File(self.file.clone()),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> Result<()> {
    let source = args.source();
    let detector = YoloDetector::load(&args.model, args.device, args.conf, args.iou)?;
    let capture = Capture::open(&source)?;
    let label_log = LabelLog::open(&args.log_file)?;

    let event_log = match args.log_json.as_ref() {
        Some(path) => {
            let mut logger = EventLog::create(path)?;
            logger.session_start(&SessionInfo {
                source: source.to_string(),
                model: args.model.display().to_string(),
                device: format!("{:?}", args.device).to_lowercase(),
                conf_threshold: args.conf,
                iou_threshold: args.iou,
            })?;
            Some(logger)
        }
        None => None,
    };

    let display = open_display(WINDOW_NAME, args.headless);
    let mut pipeline = Pipeline::new(capture, detector, display, label_log)
        .with_log_interval(Duration::from_secs(args.log_interval_seconds));
    if let Some(logger) = event_log {
        pipeline = pipeline.with_event_log(logger);
    }
    pipeline.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_fixed_behavior() {
        let args = Args::try_parse_from(["roadcount"]).unwrap();
        assert_eq!(
            args.source(),
            VideoSource::File("The Fate of the Furious ｜ Harpooning Dom's Car.mp4".into())
        );
        assert_eq!(args.log_file, PathBuf::from("detected_objects.txt"));
        assert_eq!(args.device, Device::Cuda);
        assert_eq!(args.conf, 0.25);
        assert_eq!(args.iou, 0.7);
        assert!(!args.headless);
    }

    #[test]
    fn camera_selects_index_source() {
        let args = Args::try_parse_from(["roadcount", "--camera", "0", "--device", "cpu"]).unwrap();
        assert_eq!(args.source(), VideoSource::Camera(0));
        assert_eq!(args.device, Device::Cpu);
    }

    #[test]
    fn camera_conflicts_with_explicit_file() {
        assert!(Args::try_parse_from(["roadcount", "--camera", "0", "--file", "a.mp4"]).is_err());
    }
}
