use std::str::FromStr;

use ffmpeg::codec::Id;
use serde::Deserialize;

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// MPEG-4 Part 2 ("mp4v"), built into every ffmpeg.
    #[default]
    Mpeg4,
    /// H.264, needs an ffmpeg built with an h264 encoder such as libx264.
    H264,
}

impl VideoCodec {
    pub(crate) fn codec_id(self) -> Id {
        match self {
            VideoCodec::Mpeg4 => Id::MPEG4,
            VideoCodec::H264 => Id::H264,
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpeg4" | "mp4v" => Ok(VideoCodec::Mpeg4),
            "h264" | "avc" => Ok(VideoCodec::H264),
            other => Err(format!("unsupported codec {other:?}, expected mpeg4 or h264")),
        }
    }
}

/// Output encoding settings. Resolution and frame rate always follow the input.
#[derive(Debug, Clone, Default)]
pub struct EncoderOptions {
    pub codec: VideoCodec,
    /// Bits per second. `None` picks one from resolution and frame rate.
    pub bitrate: Option<usize>,
}

impl EncoderOptions {
    pub(crate) fn bitrate_for(&self, width: u32, height: u32, frame_rate: f64) -> usize {
        // mpeg4's own default is 200 kb/s, which smears box outlines.
        self.bitrate
            .unwrap_or_else(|| (width as f64 * height as f64 * frame_rate / 8.0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codec() {
        assert_eq!("MP4V".parse::<VideoCodec>(), Ok(VideoCodec::Mpeg4));
        assert_eq!("h264".parse::<VideoCodec>(), Ok(VideoCodec::H264));
        assert!("vp9".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn test_bitrate_heuristic() {
        let options = EncoderOptions::default();
        assert_eq!(options.bitrate_for(640, 480, 30.0), 1_152_000);
        let fixed = EncoderOptions {
            bitrate: Some(500_000),
            ..Default::default()
        };
        assert_eq!(fixed.bitrate_for(640, 480, 30.0), 500_000);
    }
}
