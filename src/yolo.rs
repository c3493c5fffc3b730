use anyhow::{bail, ensure, Context, Result};
use clap::ValueEnum;
use opencv::{
    core::{self, Mat, Scalar, Size},
    dnn, imgproc,
    prelude::*,
};
use std::{cmp::Ordering, path::Path};

use crate::detection::{Detection, COCO_CLASSES};
use crate::pipeline::Detector;

/// Square input edge of a YOLOv8 ONNX export.
pub const INPUT_SIZE: i32 = 640;
pub const DEFAULT_CONF: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.7;
pub const MAX_DETECTIONS: usize = 300;
const PAD_VALUE: f64 = 114.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Device {
    Cpu,
    Cuda,
}

pub struct YoloDetector {
    net: dnn::Net,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(
        model_path: &Path,
        device: Device,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self> {
        if !model_path.is_file() {
            bail!("Model file missing: {}", model_path.display());
        }
        let mut net = dnn::read_net_from_onnx(
            model_path.to_str().context("Model path is invalid")?,
        )
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;

        match device {
            Device::Cpu => {
                net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
                net.set_preferable_target(dnn::DNN_TARGET_CPU)?;
            }
            Device::Cuda => {
                net.set_preferable_backend(dnn::DNN_BACKEND_CUDA)?;
                net.set_preferable_target(dnn::DNN_TARGET_CUDA)?;
            }
        }
        tracing::info!("Loaded {} on {:?}", model_path.display(), device);

        Ok(Self {
            net,
            conf_threshold,
            iou_threshold,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::for_frame(frame.cols(), frame.rows());
        let padded = letterbox.apply(frame)?;
        let blob = dnn::blob_from_image(
            &padded,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )
        .context("Failed to build input blob")?;
        self.net
            .set_input(&blob, "", 1.0, Scalar::default())
            .context("Failed to set network input")?;
        let output = self.net.forward_single("").context("Inference failed")?;

        // [1, 4 + classes, proposals]
        let dims = output.mat_size();
        ensure!(
            dims.dims() == 3,
            "Unexpected output rank {} (expected 3)",
            dims.dims()
        );
        let num_proposals = usize::try_from(dims[2]).context("Invalid proposal count")?;
        let data = output
            .data_typed::<f32>()
            .context("Output tensor is not f32")?;

        Ok(decode_output(
            data,
            num_proposals,
            &letterbox,
            self.conf_threshold,
            self.iou_threshold,
        ))
    }
}

/// Aspect-preserving fit of a frame into the square network input, padded
/// with gray on the short side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub resized: (i32, i32),
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
    frame_width: f32,
    frame_height: f32,
}

impl Letterbox {
    pub fn for_frame(width: i32, height: i32) -> Self {
        let input = INPUT_SIZE as f32;
        let scale = (input / width as f32).min(input / height as f32);
        let resized_w = (width as f32 * scale).round() as i32;
        let resized_h = (height as f32 * scale).round() as i32;
        let dw = (INPUT_SIZE - resized_w) as f32 / 2.0;
        let dh = (INPUT_SIZE - resized_h) as f32 / 2.0;
        Self {
            scale,
            resized: (resized_w, resized_h),
            top: (dh - 0.1).round() as i32,
            bottom: (dh + 0.1).round() as i32,
            left: (dw - 0.1).round() as i32,
            right: (dw + 0.1).round() as i32,
            frame_width: width as f32,
            frame_height: height as f32,
        }
    }

    pub fn apply(&self, frame: &Mat) -> Result<Mat> {
        let mut resized = Mat::default();
        let source = if (frame.cols(), frame.rows()) == self.resized {
            frame
        } else {
            imgproc::resize(
                frame,
                &mut resized,
                Size::new(self.resized.0, self.resized.1),
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )
            .context("Failed to resize frame for the network")?;
            &resized
        };
        let mut padded = Mat::default();
        core::copy_make_border(
            source,
            &mut padded,
            self.top,
            self.bottom,
            self.left,
            self.right,
            core::BORDER_CONSTANT,
            Scalar::all(PAD_VALUE),
        )
        .context("Failed to pad frame")?;
        Ok(padded)
    }

    /// Map an input-space point back to frame pixels, clamped to the frame.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let fx = (x - self.left as f32) / self.scale;
        let fy = (y - self.top as f32) / self.scale;
        (
            fx.clamp(0.0, self.frame_width),
            fy.clamp(0.0, self.frame_height),
        )
    }
}

/// Decode a row-major `[1, 4 + C, N]` YOLOv8 head into frame-space detections,
/// sorted by descending confidence after class-aware NMS.
pub fn decode_output(
    data: &[f32],
    num_proposals: usize,
    letterbox: &Letterbox,
    conf_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    if num_proposals == 0 {
        return Vec::new();
    }
    let rows = data.len() / num_proposals;
    if rows <= 4 {
        return Vec::new();
    }
    let num_classes = (rows - 4).min(COCO_CLASSES.len());

    let mut candidates = Vec::new();
    for i in 0..num_proposals {
        let cx = data[i];
        let cy = data[num_proposals + i];
        let w = data[2 * num_proposals + i];
        let h = data[3 * num_proposals + i];

        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class_id in 0..num_classes {
            let score = data[(4 + class_id) * num_proposals + i];
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }
        if best_score < conf_threshold {
            continue;
        }

        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        candidates.push(Detection::new([x1, y1, x2, y2], best_score, best_class));
    }

    nms(candidates, iou_threshold)
}

fn box_area(d: &Detection) -> f32 {
    (d.x2 - d.x1).max(0.0) * (d.y2 - d.y1).max(0.0)
}

fn box_iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union = box_area(a) + box_area(b) - inter_area;
    if union <= 0.0 {
        0.0
    } else {
        inter_area / union
    }
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep
            .iter()
            .all(|kept| kept.class_id != det.class_id || box_iou(kept, &det) <= iou_threshold)
        {
            keep.push(det);
            if keep.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    keep
}
