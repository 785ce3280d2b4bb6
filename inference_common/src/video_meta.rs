use image::RgbImage;
use serde::{Deserialize, Serialize};

/// One decoded RGB frame. Dimensions always match the stream it came from.
pub type Frame = RgbImage;

/// Intrinsic properties of a video stream, read once when the source is opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamProperties {
    pub width: u32,
    pub height: u32,
    /// Frames per second, always positive.
    pub frame_rate: f64,
    /// Frame count reported by the container. 0 means unknown, and a
    /// non-zero value is only a hint: decode may yield more or fewer frames.
    pub frame_count: u64,
}

impl VideoStreamProperties {
    pub fn new(width: u32, height: u32, frame_rate: f64, frame_count: u64) -> Self {
        Self {
            width,
            height,
            frame_rate,
            frame_count,
        }
    }

    /// Reported frame count, or `None` when the container did not know it.
    pub fn frame_count_hint(&self) -> Option<u64> {
        (self.frame_count > 0).then_some(self.frame_count)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_frame_count() {
        let props = VideoStreamProperties::new(640, 480, 30.0, 0);
        assert_eq!(props.frame_count_hint(), None);
    }

    #[test]
    fn test_reported_frame_count() {
        let props = VideoStreamProperties::new(640, 480, 25.0, 50);
        assert_eq!(props.frame_count_hint(), Some(50));
        assert_eq!(props.dimensions(), (640, 480));
    }
}
