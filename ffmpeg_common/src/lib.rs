//! ffmpeg-backed frame source and sink for [`inference_common::pipeline`].

extern crate ffmpeg_next as ffmpeg;

pub mod options;
pub mod sink;
pub mod source;

use std::path::Path;
use std::sync::OnceLock;

use inference_common::error::PipelineError;
use inference_common::pipeline::MediaBackend;
use inference_common::video_meta::VideoStreamProperties;

pub use options::{EncoderOptions, VideoCodec};
pub use sink::FfmpegFrameSink;
pub use source::FfmpegFrameSource;

/// Initializes ffmpeg once per process and quiets its own logging.
pub fn init() -> Result<(), ffmpeg::Error> {
    static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();
    *INIT.get_or_init(|| {
        let result = ffmpeg::init();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        result
    })
}

/// Decodes and encodes through ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    pub encoder: EncoderOptions,
}

impl FfmpegBackend {
    pub fn new(encoder: EncoderOptions) -> Self {
        Self { encoder }
    }
}

impl MediaBackend for FfmpegBackend {
    type Source = FfmpegFrameSource;
    type Sink = FfmpegFrameSink;

    fn open_source(&self, input: &Path) -> Result<FfmpegFrameSource, PipelineError> {
        FfmpegFrameSource::open(input)
    }

    fn open_sink(
        &self,
        output: &Path,
        properties: &VideoStreamProperties,
    ) -> Result<FfmpegFrameSink, PipelineError> {
        FfmpegFrameSink::create(output, properties, &self.encoder)
    }
}
