use std::sync::{Arc, Mutex};

use ffmpeg_common::FfmpegBackend;
use inference_common::detection::Detector;
use inference_common::pipeline::VideoPipeline;

use crate::config::ServerConfig;
use crate::index::VideoIndex;

pub type DetectionPipeline = VideoPipeline<FfmpegBackend, Box<dyn Detector + Send>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub index: Arc<VideoIndex>,
    /// One run at a time: the detector session is not shared between runs.
    pub pipeline: Arc<Mutex<DetectionPipeline>>,
}

impl AppState {
    pub fn new(config: ServerConfig, index: VideoIndex, pipeline: DetectionPipeline) -> Self {
        Self {
            config: Arc::new(config),
            index: Arc::new(index),
            pipeline: Arc::new(Mutex::new(pipeline)),
        }
    }
}
