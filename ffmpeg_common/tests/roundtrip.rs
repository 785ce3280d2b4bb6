use std::path::Path;

use ffmpeg_common::{EncoderOptions, FfmpegBackend, FfmpegFrameSink, FfmpegFrameSource};
use image::{Rgb, RgbImage};
use inference_common::bbox::Bbox;
use inference_common::detection::{Detection, Detector};
use inference_common::error::PipelineError;
use inference_common::pipeline::{FrameSink, FrameSource, VideoPipeline};
use inference_common::video_meta::VideoStreamProperties;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

fn gradient(i: u32) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgb([(x + i * 8) as u8, (y * 2) as u8, (i * 20) as u8])
    })
}

fn write_clip(path: &Path, frames: u32) -> Result<(), PipelineError> {
    let props = VideoStreamProperties::new(WIDTH, HEIGHT, 30.0, frames as u64);
    let mut sink = FfmpegFrameSink::create(path, &props, &EncoderOptions::default())?;
    for i in 0..frames {
        sink.write_frame(&gradient(i))?;
    }
    sink.close()
}

fn read_all(path: &Path) -> Result<(VideoStreamProperties, Vec<RgbImage>), PipelineError> {
    let mut source = FfmpegFrameSource::open(path)?;
    let props = source.properties();
    let mut frames = Vec::new();
    while let Some(frame) = source.next_frame()? {
        frames.push(frame);
    }
    source.close();
    Ok((props, frames))
}

#[test]
fn test_encode_then_decode_keeps_count_and_geometry() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.mp4");
    write_clip(&path, 10)?;

    let (props, frames) = read_all(&path)?;
    assert_eq!(props.dimensions(), (WIDTH, HEIGHT));
    assert!((props.frame_rate - 30.0).abs() < 0.5, "{}", props.frame_rate);
    assert_eq!(frames.len(), 10);
    assert!(frames.iter().all(|f| f.dimensions() == (WIDTH, HEIGHT)));
    Ok(())
}

#[test]
fn test_missing_input_is_unreadable() {
    let err = FfmpegFrameSource::open(Path::new("/definitely/not/here.mp4"))
        .err()
        .expect("source should not open");
    assert!(matches!(err, PipelineError::UnreadableMedia { .. }), "{err:?}");
}

#[test]
fn test_non_video_input_is_unreadable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.mp4");
    std::fs::write(&path, b"this is plain text, not a container")?;

    let err = FfmpegFrameSource::open(&path)
        .err()
        .expect("source should not open");
    assert!(matches!(err, PipelineError::UnreadableMedia { .. }), "{err:?}");
    Ok(())
}

#[test]
fn test_output_in_missing_directory_is_unwritable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing").join("out.mp4");
    let props = VideoStreamProperties::new(WIDTH, HEIGHT, 30.0, 0);

    let err = FfmpegFrameSink::create(&path, &props, &EncoderOptions::default())
        .err()
        .expect("sink should not open");
    assert!(
        matches!(err, PipelineError::UnwritableDestination { .. }),
        "{err:?}"
    );
    Ok(())
}

#[test]
fn test_wrong_frame_size_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.mp4");
    let props = VideoStreamProperties::new(WIDTH, HEIGHT, 30.0, 0);
    let mut sink = FfmpegFrameSink::create(&path, &props, &EncoderOptions::default())?;

    let err = sink.write_frame(&RgbImage::new(WIDTH / 2, HEIGHT)).unwrap_err();
    assert!(matches!(err, PipelineError::DimensionMismatch { .. }), "{err:?}");
    sink.close()?;
    Ok(())
}

/// Reports a car on frames 3 and 7 and a pedestrian on frame 5.
#[derive(Default)]
struct CountingDetector {
    frame: u32,
}

impl Detector for CountingDetector {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        self.frame += 1;
        let bbox = Bbox::new(10.0, 10.0, 60.0, 50.0);
        Ok(match self.frame {
            3 | 7 => vec![Detection::new("car", bbox, 0.9)],
            5 => vec![Detection::new("pedestrian", bbox, 0.7)],
            _ => Vec::new(),
        })
    }
}

#[test]
fn test_pipeline_over_ffmpeg() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("in_out.mp4");
    write_clip(&input, 10)?;

    let mut pipeline = VideoPipeline::new(FfmpegBackend::default(), CountingDetector::default());
    let record = pipeline.process(&input, &output, Some(vec!["truck".to_string()]))?;

    assert_eq!(record.detected_labels, vec!["car", "pedestrian"]);
    assert_eq!(record.suggested_labels, vec!["truck"]);
    assert_eq!(pipeline.detector().frame, 10);

    let (props, frames) = read_all(&output)?;
    assert_eq!(props.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(frames.len(), 10);
    Ok(())
}
