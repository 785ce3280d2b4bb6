use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the frame it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Builds a box from yolo-style center + size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection(&self, other: &Bbox) -> f32 {
        let w = (self.xmax.min(other.xmax) - self.xmin.max(other.xmin)).max(0.0);
        let h = (self.ymax.min(other.ymax) - self.ymin.max(other.ymin)).max(0.0);
        w * h
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamps the box to a `width` x `height` frame.
    pub fn clamp(self, width: f32, height: f32) -> Self {
        Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
        }
    }

    /// Scales x and y coordinates independently, e.g. from model input space back to the frame.
    pub fn scale(self, sx: f32, sy: f32) -> Self {
        Self {
            xmin: self.xmin * sx,
            ymin: self.ymin * sy,
            xmax: self.xmax * sx,
            ymax: self.ymax * sy,
        }
    }
}

/// Greedy non-maximum suppression over `(box, score)` pairs.
///
/// Returns indices of kept boxes, highest score first.
pub fn nms(candidates: &[(Bbox, f32)], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[b].1.total_cmp(&candidates[a].1));

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        let bbox = &candidates[idx].0;
        if keep
            .iter()
            .all(|&kept| candidates[kept].0.iou(bbox) <= iou_threshold)
        {
            keep.push(idx);
        }
    }
    keep
}
