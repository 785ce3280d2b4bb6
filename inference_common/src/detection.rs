use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::annotate::Annotator;
use crate::bbox::Bbox;

/// A single object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bbox: Bbox,
    /// In `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: Bbox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Per-frame object detection capability.
///
/// Implementations are driven by one pipeline run at a time; `detect` takes
/// `&mut self` because inference sessions generally keep scratch state.
pub trait Detector {
    /// Runs inference on one frame, returning zero or more detections.
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;

    /// Renders `detections` onto a copy of `frame`.
    ///
    /// The returned image must have the same dimensions as `frame`.
    fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> anyhow::Result<RgbImage> {
        Ok(Annotator::default().draw(frame, detections))
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> anyhow::Result<RgbImage> {
        (**self).annotate(frame, detections)
    }
}
