//! YOLOv8 object detection on an onnx runtime session.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use image::imageops::FilterType;
use inference_common::annotate::Annotator;
use inference_common::bbox::{Bbox, nms};
use inference_common::coco_classes;
use inference_common::detection::{Detection, Detector};
use ndarray::{Array4, CowArray};
use ort::session::Session;
use ort::value::TensorRef;

use crate::session::load_session;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum class score for a candidate box.
    pub conf_threshold: f32,
    /// Boxes of the same class overlapping more than this are suppressed.
    pub iou_threshold: f32,
    /// Square model input resolution.
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Reads class names, one per line. `None` gives the 80 COCO classes.
pub fn load_labels(path: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(coco_classes::labels());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels file {path:?}"))?;
    let labels: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        anyhow::bail!("Labels file {path:?} contains no class names");
    }
    Ok(labels)
}

pub struct YoloV8Detector {
    session: Session,
    labels: Vec<String>,
    config: DetectorConfig,
    annotator: Annotator,
}

impl YoloV8Detector {
    pub fn new(model: &Path, labels: Vec<String>, config: DetectorConfig) -> anyhow::Result<Self> {
        let session = load_session(model)?;
        log::info!(
            "Loaded yolov8 model {model:?} with {} classes, {config:?}",
            labels.len()
        );
        Ok(Self {
            session,
            labels,
            config,
            annotator: Annotator::default(),
        })
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }
}

impl Detector for YoloV8Detector {
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let input = preprocess(frame, self.config.input_size);
        let input_dyn = CowArray::from(input).into_dyn();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(&input_dyn)?])?;
        let (shape, output) = outputs[0].try_extract_tensor::<f32>()?;
        postprocess(
            output,
            shape,
            frame.dimensions(),
            &self.labels,
            &self.config,
        )
    }

    fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> anyhow::Result<RgbImage> {
        Ok(self.annotator.draw(frame, detections))
    }
}

/// Stretches the frame to `size` x `size`, NCHW, values in `[0, 1]`.
pub fn preprocess(frame: &RgbImage, size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
    let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    input
}

/// Decodes a `[1, 4 + classes, anchors]` yolov8 output into frame-space detections.
///
/// Rows 0..4 hold cx, cy, w, h in model input pixels, the rest per-class scores.
/// Results are sorted by descending confidence.
pub fn postprocess(
    output: &[f32],
    shape: &[i64],
    (frame_width, frame_height): (u32, u32),
    labels: &[String],
    config: &DetectorConfig,
) -> anyhow::Result<Vec<Detection>> {
    let [_, channels, anchors] = shape else {
        anyhow::bail!("Unexpected yolov8 output shape {shape:?}");
    };
    let (channels, anchors) = (*channels as usize, *anchors as usize);
    if channels < 5 || output.len() != channels * anchors {
        anyhow::bail!(
            "yolov8 output of {} values does not fit shape {shape:?}",
            output.len()
        );
    }
    let at = |row: usize, anchor: usize| output[row * anchors + anchor];

    let sx = frame_width as f32 / config.input_size as f32;
    let sy = frame_height as f32 / config.input_size as f32;

    let mut by_class: HashMap<usize, Vec<(Bbox, f32)>> = HashMap::new();
    for anchor in 0..anchors {
        let Some((class, score)) = (4..channels)
            .map(|row| (row - 4, at(row, anchor)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if score < config.conf_threshold {
            continue;
        }
        let bbox = Bbox::from_center(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        )
        .scale(sx, sy)
        .clamp(frame_width as f32, frame_height as f32);
        by_class.entry(class).or_default().push((bbox, score));
    }

    let mut detections = Vec::new();
    for (class, candidates) in by_class {
        let label = labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{class}"));
        for idx in nms(&candidates, config.iou_threshold) {
            let (bbox, score) = candidates[idx];
            detections.push(Detection::new(label.clone(), bbox, score));
        }
    }
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(detections)
}
