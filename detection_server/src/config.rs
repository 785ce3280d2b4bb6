use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ffmpeg_common::{EncoderOptions, VideoCodec};
use inference_common::pipeline::PipelineConfig;
use serde::Deserialize;

/// Server settings. Every key has a default; a config file and `DETECT_*`
/// environment variables override them, in that order.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Annotated videos, their result records and the run index.
    pub processed_dir: PathBuf,
    /// Scratch space for uploads while they are processed.
    pub uploads_dir: PathBuf,
    pub model_path: PathBuf,
    /// Newline separated class names. COCO names when unset.
    pub labels_path: Option<PathBuf>,
    /// Caption font. Boxes are drawn without captions when unset.
    pub font_path: Option<PathBuf>,
    pub cuda: bool,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_upload_bytes: usize,
    pub output_extension: String,
    /// `mpeg4` or `h264`.
    pub codec: VideoCodec,
    /// Encoder bits per second, derived from resolution and frame rate when unset.
    pub bitrate: Option<usize>,
    /// Pipeline progress is logged every this many frames.
    pub log_interval_frames: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            processed_dir: PathBuf::from("processed"),
            uploads_dir: PathBuf::from("uploads"),
            model_path: PathBuf::from("best.onnx"),
            labels_path: None,
            font_path: None,
            cuda: false,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_upload_bytes: 512 * 1024 * 1024,
            output_extension: "mp4".to_string(),
            codec: VideoCodec::default(),
            bitrate: None,
            log_interval_frames: PipelineConfig::default().log_interval_frames,
        }
    }
}

impl ServerConfig {
    /// Layers `path` (optional) and the environment over the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("DETECT").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read configuration from {path:?}"))?;
        let config: Self = settings
            .try_deserialize()
            .context("Invalid server configuration")?;
        if config.output_extension.is_empty() {
            anyhow::bail!("output_extension must not be empty");
        }
        Ok(config)
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            codec: self.codec,
            bitrate: self.bitrate,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            log_interval_frames: self.log_interval_frames,
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.bind_addr, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.processed_dir, PathBuf::from("processed"));
        assert_eq!(config.output_extension, "mp4");
        assert!(config.labels_path.is_none());
        assert_eq!(config.codec, VideoCodec::Mpeg4);
        assert_eq!(config.pipeline_config().log_interval_frames, 30);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "port = 8080\nprocessed_dir = \"/srv/out\"\nconf_threshold = 0.5\ncodec = \"h264\"\nbitrate = 2000000\nlog_interval_frames = 100\n",
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.processed_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.conf_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.45);
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
        let encoder = config.encoder_options();
        assert_eq!(encoder.codec, VideoCodec::H264);
        assert_eq!(encoder.bitrate, Some(2_000_000));
        assert_eq!(config.pipeline_config().log_interval_frames, 100);
    }
}
