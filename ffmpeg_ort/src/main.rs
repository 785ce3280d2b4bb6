use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ffmpeg_common::{EncoderOptions, FfmpegBackend, VideoCodec};
use indicatif::{ProgressBar, ProgressStyle};
use inference_common::annotate::{load_font, Annotator};
use inference_common::detection::Detector;
use inference_common::pipeline::{MediaBackend, VideoPipeline};
use inference_common::progress::ProgressInfo;
use inference_common::result_record::{results_path_for, ResultRecord};
use ort_common::session::init_execution_provider;
use ort_common::yolov8::{load_labels, DetectorConfig, YoloV8Detector};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
pub struct Args {
    /// Path to input video file (.mp4/.mkv/.avi/...).
    input: PathBuf,
    /// Annotated output video. Defaults to `<input stem>_out.mp4` next to the input.
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Yolov8 onnx model file to use.
    #[arg(long, short, default_value = "_models/yolov8s.onnx")]
    model: PathBuf,
    /// Class names, one per line. Defaults to the 80 COCO classes.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    #[arg(long, default_value_t = 0.25)]
    conf_threshold: f32,
    #[arg(long, default_value_t = 0.45)]
    iou_threshold: f32,
    /// TTF/OTF font for box captions. Boxes are drawn without captions if unset.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Comma separated labels stored verbatim in the results file.
    #[arg(long, value_delimiter = ',')]
    suggested_labels: Option<Vec<String>>,
    /// Output codec: mpeg4 or h264.
    #[arg(long, default_value = "mpeg4")]
    codec: VideoCodec,
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    input.with_file_name(format!("{stem}_out.mp4"))
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    let style =
        ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
    pb.set_style(style.progress_chars("##-"));
    Ok(pb)
}

/// Encodes into a hidden sibling of `output` and renames it into place once the
/// run succeeded. A failed run leaves any existing `output` untouched.
fn run<B: MediaBackend, D: Detector>(
    pipeline: &mut VideoPipeline<B, D>,
    input: &Path,
    output: &Path,
    suggested_labels: Option<Vec<String>>,
) -> anyhow::Result<ResultRecord> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix(".")
        .suffix(&suffix)
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create a temporary output in {dir:?}"))?;

    let record = pipeline
        .process(input, staged.path(), suggested_labels)
        .with_context(|| format!("Failed to process {input:?}"))?;
    staged
        .persist(output)
        .with_context(|| format!("Failed to move the annotated video to {output:?}"))?;

    let results_path = results_path_for(output);
    if let Err(e) = record.write_atomic(&results_path) {
        if let Err(rm) = std::fs::remove_file(output) {
            log::warn!("Failed to remove {output:?}: {rm}");
        }
        return Err(e).with_context(|| format!("Failed to write {results_path:?}"));
    }
    Ok(record)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ffmpeg_ort=info,inference_common=info,ffmpeg_common=info,ort_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input));

    let ep_name = init_execution_provider(args.cuda)?;
    let labels = load_labels(args.labels.as_deref())?;
    let config = DetectorConfig {
        conf_threshold: args.conf_threshold,
        iou_threshold: args.iou_threshold,
        ..Default::default()
    };
    let mut annotator = Annotator::default();
    if let Some(font) = &args.font {
        annotator = annotator.with_font(load_font(font)?);
    }
    let detector = YoloV8Detector::new(&args.model, labels, config)?.with_annotator(annotator);
    log::info!("Prepared ort {ep_name} session with model: {:?}", args.model);

    let pb = progress_bar()?;
    let bar = pb.clone();
    let on_progress = move |info: &ProgressInfo| {
        if let Some(total) = info.total {
            bar.set_length(total.max(info.current));
        }
        bar.set_position(info.current);
        bar.set_message(format!("{:.1} fps", info.fps()));
    };

    let backend = FfmpegBackend::new(EncoderOptions {
        codec: args.codec,
        ..Default::default()
    });
    let mut pipeline = VideoPipeline::new(backend, detector).with_progress(Arc::new(on_progress));

    let record = match run(&mut pipeline, &args.input, &output, args.suggested_labels.clone()) {
        Ok(record) => record,
        Err(e) => {
            pb.abandon();
            return Err(e);
        }
    };
    pb.finish();

    log::info!("Annotated video: {output:?}");
    log::info!("Results: {:?}", results_path_for(&output));
    println!("{}", record.detected_labels.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use ffmpeg_common::FfmpegFrameSink;
    use image::{Rgb, RgbImage};
    use inference_common::bbox::Bbox;
    use inference_common::detection::Detection;
    use inference_common::pipeline::FrameSink;
    use inference_common::video_meta::VideoStreamProperties;

    use super::*;

    struct AlwaysPerson;

    impl Detector for AlwaysPerson {
        fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            Ok(vec![Detection::new("person", Bbox::new(2.0, 2.0, 20.0, 30.0), 0.9)])
        }
    }

    fn synth_clip(path: &Path) {
        let props = VideoStreamProperties::new(64, 48, 25.0, 4);
        let mut sink = FfmpegFrameSink::create(path, &props, &EncoderOptions::default()).unwrap();
        for i in 0..4u8 {
            let frame = RgbImage::from_pixel(64, 48, Rgb([i * 50, 120, 60]));
            sink.write_frame(&frame).unwrap();
        }
        sink.close().unwrap();
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_failed_run_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.mp4");
        std::fs::write(&input, b"not a video at all").unwrap();
        let output = dir.path().join("keep.mp4");
        std::fs::write(&output, b"precious").unwrap();

        let mut pipeline = VideoPipeline::new(FfmpegBackend::default(), AlwaysPerson);
        assert!(run(&mut pipeline, &input, &output, None).is_err());

        assert_eq!(std::fs::read(&output).unwrap(), b"precious");
        assert_eq!(file_names(dir.path()), vec!["broken.mp4", "keep.mp4"]);
    }

    #[test]
    fn test_run_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        synth_clip(&input);
        let output = dir.path().join("clip_out.mp4");
        std::fs::write(&output, b"stale").unwrap();

        let mut pipeline = VideoPipeline::new(FfmpegBackend::default(), AlwaysPerson);
        let record = run(&mut pipeline, &input, &output, Some(vec!["dog".to_string()])).unwrap();
        assert_eq!(record.detected_labels, vec!["person"]);

        assert!(std::fs::metadata(&output).unwrap().len() > 5);
        let saved = ResultRecord::read(&results_path_for(&output)).unwrap();
        assert_eq!(saved, record);
        assert_eq!(
            file_names(dir.path()),
            vec!["clip.mp4", "clip_out.mp4", "clip_out_results.json"]
        );
    }

    #[test]
    fn test_default_output_name() {
        assert_eq!(
            default_output(Path::new("/videos/street.mkv")),
            PathBuf::from("/videos/street_out.mp4")
        );
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "ffmpeg_ort",
            "in.mp4",
            "--suggested-labels",
            "car,truck",
            "--codec",
            "h264",
        ]);
        assert_eq!(
            args.suggested_labels,
            Some(vec!["car".to_string(), "truck".to_string()])
        );
        assert_eq!(args.codec, VideoCodec::H264);
        assert!(args.output.is_none());
    }
}
