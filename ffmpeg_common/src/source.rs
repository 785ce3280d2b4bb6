use std::path::{Path, PathBuf};

use ffmpeg::format::{self, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, decoder, Error as FfmpegError, Packet, Rational};
use image::RgbImage;
use inference_common::error::PipelineError;
use inference_common::pipeline::FrameSource;
use inference_common::video_meta::{Frame, VideoStreamProperties};

/// Open decoder state, dropped as a unit on close.
struct Decoding {
    input: format::context::Input,
    decoder: decoder::Video,
    scaler: Scaler,
    stream_index: usize,
    decoded: Video,
    eof_sent: bool,
}

/// Decodes the best video stream of a file into RGB frames, in presentation order.
pub struct FfmpegFrameSource {
    path: PathBuf,
    properties: VideoStreamProperties,
    state: Option<Decoding>,
}

fn positive_rate(rate: Rational) -> Option<f64> {
    (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate))
}

impl FfmpegFrameSource {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        crate::init().map_err(|e| PipelineError::unreadable(path, e))?;
        log::info!("Discovering media properties of {path:?}");

        let input = format::input(&path).map_err(|e| PipelineError::unreadable(path, e))?;
        let (stream_index, frame_rate, frame_count, parameters) = {
            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| PipelineError::unreadable(path, "no video stream"))?;
            let frame_rate = positive_rate(stream.avg_frame_rate())
                .or_else(|| positive_rate(stream.rate()))
                .ok_or_else(|| PipelineError::unreadable(path, "unknown frame rate"))?;
            (
                stream.index(),
                frame_rate,
                stream.frames().max(0) as u64,
                stream.parameters(),
            )
        };

        let context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| PipelineError::unreadable(path, e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::unreadable(path, e))?;
        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(PipelineError::unreadable(path, "video stream has no dimensions"));
        }

        let scaler = Scaler::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::unreadable(path, e))?;

        let properties = VideoStreamProperties::new(width, height, frame_rate, frame_count);
        Ok(Self {
            path: path.to_path_buf(),
            properties,
            state: Some(Decoding {
                input,
                decoder,
                scaler,
                stream_index,
                decoded: Video::empty(),
                eof_sent: false,
            }),
        })
    }
}

impl Decoding {
    /// Converts the last decoded frame to a tightly packed RGB image.
    fn to_rgb(&mut self) -> Result<RgbImage, FfmpegError> {
        let mut rgb = Video::empty();
        self.scaler.run(&self.decoded, &mut rgb)?;

        let (width, height) = (rgb.width(), rgb.height());
        let stride = rgb.stride(0);
        let row_len = width as usize * 3;
        let data = rgb.data(0);
        let mut buf = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            buf.extend_from_slice(&data[start..start + row_len]);
        }
        RgbImage::from_raw(width, height, buf).ok_or(FfmpegError::InvalidData)
    }
}

impl FrameSource for FfmpegFrameSource {
    fn properties(&self) -> VideoStreamProperties {
        self.properties
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let path = &self.path;
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        loop {
            // Drain what the decoder already has before feeding more packets.
            if state.decoder.receive_frame(&mut state.decoded).is_ok() {
                let frame = state
                    .to_rgb()
                    .map_err(|e| PipelineError::unreadable(path, e))?;
                return Ok(Some(frame));
            }
            if state.eof_sent {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut state.input) {
                Ok(()) => {
                    // Other streams (audio, subtitles) are dropped.
                    if packet.stream() == state.stream_index {
                        state
                            .decoder
                            .send_packet(&packet)
                            .map_err(|e| PipelineError::unreadable(path, e))?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    state
                        .decoder
                        .send_eof()
                        .map_err(|e| PipelineError::unreadable(path, e))?;
                    state.eof_sent = true;
                }
                Err(e) => return Err(PipelineError::unreadable(path, e)),
            }
        }
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("Closed decoder for {:?}", self.path);
        }
    }
}
