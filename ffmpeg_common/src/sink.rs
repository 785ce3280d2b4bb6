use std::path::{Path, PathBuf};

use ffmpeg::format::{self, Pixel};
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, encoder, Packet, Rational};
use inference_common::error::PipelineError;
use inference_common::pipeline::{ensure_dimensions, FrameSink};
use inference_common::video_meta::{Frame, VideoStreamProperties};

use crate::options::EncoderOptions;

const ENCODER_PIXEL: Pixel = Pixel::YUV420P;

/// Open encoder state, finalized as a unit on close.
struct Encoding {
    output: format::context::Output,
    encoder: encoder::video::Encoder,
    scaler: Scaler,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    next_pts: i64,
}

/// Encodes RGB frames into a single-video-stream container picked by file extension.
///
/// Dropping an open sink finalizes it, so the container is never left without a trailer.
pub struct FfmpegFrameSink {
    path: PathBuf,
    width: u32,
    height: u32,
    state: Option<Encoding>,
}

/// Frame rate as a rational with a small denominator, mpeg4 rejects time bases past 1/65535.
fn frame_rate_rational(frame_rate: f64) -> Rational {
    Rational::new((frame_rate * 1000.0).round() as i32, 1000).reduce()
}

impl FfmpegFrameSink {
    pub fn create(
        path: &Path,
        properties: &VideoStreamProperties,
        options: &EncoderOptions,
    ) -> Result<Self, PipelineError> {
        crate::init().map_err(|e| PipelineError::unwritable(path, e))?;
        let (width, height) = properties.dimensions();

        let mut output = format::output(&path).map_err(|e| PipelineError::unwritable(path, e))?;
        let global_header = output
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let codec = encoder::find(options.codec.codec_id()).ok_or_else(|| {
            PipelineError::unwritable(path, format!("{:?} encoder not available", options.codec))
        })?;

        let frame_rate = frame_rate_rational(properties.frame_rate);
        let encoder_time_base = frame_rate.invert();

        let (stream_index, encoder) = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| PipelineError::unwritable(path, e))?;

            let mut video = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(|e| PipelineError::unwritable(path, e))?;
            video.set_width(width);
            video.set_height(height);
            video.set_format(ENCODER_PIXEL);
            video.set_time_base(encoder_time_base);
            video.set_frame_rate(Some(frame_rate));
            video.set_bit_rate(options.bitrate_for(width, height, properties.frame_rate));
            if global_header {
                video.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            let opened = video
                .open_as(codec)
                .map_err(|e| PipelineError::unwritable(path, e))?;
            stream.set_parameters(&opened);
            stream.set_time_base(encoder_time_base);
            (stream.index(), opened)
        };

        output
            .write_header()
            .map_err(|e| PipelineError::unwritable(path, e))?;
        // The muxer may pick its own time base while writing the header.
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| PipelineError::unwritable(path, "output stream vanished"))?;

        let scaler = Scaler::get(
            Pixel::RGB24,
            width,
            height,
            ENCODER_PIXEL,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::unwritable(path, e))?;

        log::info!(
            "Writing {width}x{height} @ {frame_rate} fps ({:?}) to {path:?}",
            options.codec
        );
        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            state: Some(Encoding {
                output,
                encoder,
                scaler,
                stream_index,
                encoder_time_base,
                stream_time_base,
                next_pts: 0,
            }),
        })
    }
}

impl Encoding {
    fn drain_packets(&mut self) -> Result<(), PipelineError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(PipelineError::encode)?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        ensure_dimensions(frame, self.width, self.height)?;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| PipelineError::encode("sink already closed"))?;

        let mut rgb = Video::new(Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        let row_len = self.width as usize * 3;
        let dst = rgb.data_mut(0);
        for (y, row) in frame.as_raw().chunks_exact(row_len).enumerate() {
            dst[y * stride..y * stride + row_len].copy_from_slice(row);
        }

        let mut yuv = Video::empty();
        state
            .scaler
            .run(&rgb, &mut yuv)
            .map_err(PipelineError::encode)?;
        yuv.set_pts(Some(state.next_pts));
        state.next_pts += 1;

        state
            .encoder
            .send_frame(&yuv)
            .map_err(PipelineError::encode)?;
        state.drain_packets()
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        state.encoder.send_eof().map_err(PipelineError::encode)?;
        state.drain_packets()?;
        state
            .output
            .write_trailer()
            .map_err(PipelineError::encode)?;
        log::debug!("Finalized {:?} after {} frames", self.path, state.next_pts);
        Ok(())
    }
}

impl Drop for FfmpegFrameSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to finalize {:?}: {e}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_rational() {
        assert_eq!(frame_rate_rational(30.0), Rational::new(30, 1));
        assert_eq!(frame_rate_rational(29.97), Rational::new(2997, 100));
        assert_eq!(frame_rate_rational(30000.0 / 1001.0), Rational::new(2997, 100));
    }
}
