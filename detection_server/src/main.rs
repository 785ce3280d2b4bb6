mod config;
mod error;
mod index;
mod routes;
mod state;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ffmpeg_common::FfmpegBackend;
use inference_common::annotate::{Annotator, load_font};
use inference_common::detection::Detector;
use inference_common::pipeline::VideoPipeline;
use ort_common::session::init_execution_provider;
use ort_common::yolov8::{DetectorConfig, YoloV8Detector, load_labels};
use tracing::info;
use tracing_subscriber::prelude::*;

use crate::config::ServerConfig;
use crate::index::VideoIndex;
use crate::state::{AppState, DetectionPipeline};

#[derive(Debug, Parser)]
pub struct Args {
    /// Configuration file. Missing files are ignored, `DETECT_*` variables still apply.
    #[arg(long, default_value = "detection_server.toml")]
    config: PathBuf,
}

fn build_pipeline(config: &ServerConfig) -> anyhow::Result<DetectionPipeline> {
    let ep_name = init_execution_provider(config.cuda)?;
    let labels = load_labels(config.labels_path.as_deref())?;
    let mut annotator = Annotator::default();
    if let Some(font) = &config.font_path {
        annotator = annotator.with_font(load_font(font)?);
    }
    let detector = YoloV8Detector::new(
        &config.model_path,
        labels,
        DetectorConfig {
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            ..Default::default()
        },
    )?
    .with_annotator(annotator);
    info!(
        "Prepared ort {ep_name} session with model: {:?}",
        config.model_path
    );

    ffmpeg_common::init().context("Failed to initialize ffmpeg")?;
    let detector: Box<dyn Detector + Send> = Box::new(detector);
    let backend = FfmpegBackend::new(config.encoder_options());
    Ok(VideoPipeline::new(backend, detector).with_config(config.pipeline_config()))
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.socket_addr()?;
    let app = routes::create_router(state);

    info!("REST API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,detection_server=info,inference_common=info,ffmpeg_common=info,ort_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config)?;
    info!("Configuration loaded: {config:?}");

    for dir in [&config.processed_dir, &config.uploads_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {dir:?}"))?;
    }
    let index = VideoIndex::open(&config.processed_dir)?;
    let pipeline = build_pipeline(&config)?;

    serve(AppState::new(config, index, pipeline)).await
}
