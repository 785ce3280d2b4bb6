//! Decode -> detect -> annotate -> encode orchestration for one video.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::detection::Detector;
use crate::error::PipelineError;
use crate::frame_times::{AggregatedTimes, FrameTimes};
use crate::label_set::LabelSet;
use crate::progress::{ProgressCallback, ProgressInfo};
use crate::result_record::ResultRecord;
use crate::video_meta::{Frame, VideoStreamProperties};

/// Lazy, forward-only producer of decoded frames.
pub trait FrameSource {
    fn properties(&self) -> VideoStreamProperties;

    /// `Ok(None)` marks end of stream, the only normal termination.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;

    /// Releases the decoder. Safe to call more than once.
    fn close(&mut self);
}

/// Ordered consumer of frames that encodes them into an output container.
pub trait FrameSink {
    /// Fails with [`PipelineError::DimensionMismatch`] if `frame` does not match the configured size.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), PipelineError>;

    /// Flushes buffered frames and finalizes the container. Safe to call more than once.
    fn close(&mut self) -> Result<(), PipelineError>;
}

/// Opens sources and sinks for a given media implementation.
pub trait MediaBackend {
    type Source: FrameSource;
    type Sink: FrameSink;

    fn open_source(&self, input: &Path) -> Result<Self::Source, PipelineError>;

    fn open_sink(
        &self,
        output: &Path,
        properties: &VideoStreamProperties,
    ) -> Result<Self::Sink, PipelineError>;
}

/// Shared dimension check for [`FrameSink`] implementations.
pub fn ensure_dimensions(frame: &Frame, width: u32, height: u32) -> Result<(), PipelineError> {
    let (actual_width, actual_height) = frame.dimensions();
    if (actual_width, actual_height) != (width, height) {
        return Err(PipelineError::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width,
            actual_height,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Log a progress line every this many frames.
    pub log_interval_frames: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_interval_frames: 30,
        }
    }
}

/// Runs a [`Detector`] over every frame of a video and writes an annotated copy.
///
/// Holds no per-run state: each call to [`process`](Self::process) gets its own
/// source, sink and [`LabelSet`].
pub struct VideoPipeline<B, D> {
    backend: B,
    detector: D,
    config: PipelineConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl<B: MediaBackend, D: Detector> VideoPipeline<B, D> {
    pub fn new(backend: B, detector: D) -> Self {
        Self {
            backend,
            detector,
            config: PipelineConfig::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Processes `input` into an annotated video at `output`.
    ///
    /// Source and sink are closed on every exit path, sink first. Persisting
    /// the returned record is up to the caller.
    pub fn process(
        &mut self,
        input: &Path,
        output: &Path,
        suggested_labels: Option<Vec<String>>,
    ) -> Result<ResultRecord, PipelineError> {
        let mut source = self.backend.open_source(input)?;
        let properties = source.properties();
        log::info!("Opened {input:?}: {properties:?}");

        let mut sink = match self.backend.open_sink(output, &properties) {
            Ok(sink) => sink,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        let mut labels = LabelSet::new();
        let mut agg_times = AggregatedTimes::default();
        let run = self.run_frames(&mut source, &mut sink, &properties, &mut labels, &mut agg_times);

        // Sink first, it may still hold buffered frames.
        let closed = sink.close();
        source.close();

        let frames = match (run, closed) {
            (Ok(frames), Ok(())) => frames,
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    log::warn!("Closing sink after failed run: {close_err}");
                }
                return Err(e);
            }
            (Ok(_), Err(e)) => return Err(e),
        };

        log::info!(
            "Wrote {frames} frames to {output:?}, {} distinct labels",
            labels.len()
        );
        // Ignore the first (outlier) frame.
        log::info!("Average frame times: {:?}", agg_times.avg(true));
        log::info!("Min frame times: {:?}", agg_times.min(true));
        log::info!("Max frame times: {:?}", agg_times.max(true));

        Ok(ResultRecord::new(&labels, suggested_labels))
    }

    /// Returns the number of frames written.
    fn run_frames(
        &mut self,
        source: &mut B::Source,
        sink: &mut B::Sink,
        properties: &VideoStreamProperties,
        labels: &mut LabelSet,
        agg_times: &mut AggregatedTimes,
    ) -> Result<u64, PipelineError> {
        let started = Instant::now();
        let interval = self.config.log_interval_frames.max(1);
        let mut frame_index: u64 = 0;

        loop {
            let mut frame_times = FrameTimes::default();

            let start = Instant::now();
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Decoding stopped at frame {frame_index}: {e}");
                    return Err(e);
                }
            };
            frame_times.decode = start.elapsed();

            let start = Instant::now();
            let detections = self
                .detector
                .detect(&frame)
                .map_err(|e| PipelineError::inference(frame_index, e))?;
            frame_times.inference = start.elapsed();
            labels.extend_from_detections(&detections);

            let start = Instant::now();
            let annotated = self
                .detector
                .annotate(&frame, &detections)
                .map_err(|e| PipelineError::inference(frame_index, e))?;
            frame_times.annotate = start.elapsed();

            let start = Instant::now();
            if let Err(e) = sink.write_frame(&annotated) {
                log::error!("Writing frame {frame_index} failed: {e}");
                return Err(e);
            }
            frame_times.encode = start.elapsed();

            frame_index += 1;
            agg_times.push(frame_times);

            let info = ProgressInfo::new(frame_index, properties.frame_count, started.elapsed());
            if let Some(progress) = &self.progress {
                progress.on_progress(&info);
            }
            if frame_index % interval == 0 {
                log::info!("Processed {info}");
            }
            log::debug!("frame {frame_index}: {} detections, {frame_times:?}", detections.len());
        }

        if let Some(expected) = properties.frame_count_hint() {
            if expected != frame_index {
                log::debug!("Source reported {expected} frames, decoded {frame_index}");
            }
        }
        Ok(frame_index)
    }
}
