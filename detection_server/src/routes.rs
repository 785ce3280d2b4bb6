use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, Request, State};
use axum::http::{HeaderValue, header};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use chrono::Utc;
use inference_common::result_record::{ResultRecord, results_path_for};
use serde::Serialize;
use tempfile::NamedTempFile;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::index::{RunEntry, VideoIndex};
use crate::state::{AppState, DetectionPipeline};

#[derive(Debug, Serialize)]
struct VideoInfo {
    filename: String,
    video_url: String,
    detected_labels: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    video_number: u64,
    #[serde(flatten)]
    video: VideoInfo,
}

#[derive(Debug, Serialize)]
struct LatestResponse {
    success: bool,
    #[serde(flatten)]
    video: VideoInfo,
}

#[derive(Debug, Serialize)]
struct AllVideosResponse {
    success: bool,
    videos: Vec<VideoInfo>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    videos: usize,
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/process-video", post(process_video))
        .route("/api/latest-video", get(latest_video))
        .route("/api/all-videos", get(all_videos))
        .route("/api/download-video/:video_id", get(download_video))
        .route("/processed/:filename", get(processed_video))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn video_url(filename: &str) -> String {
    format!("/processed/{filename}")
}

fn video_info(index: &VideoIndex, entry: &RunEntry) -> VideoInfo {
    VideoInfo {
        filename: entry.video_file.clone(),
        video_url: video_url(&entry.video_file),
        detected_labels: index.detected_labels(entry),
    }
}

/// Streams `path` with range support and a content type guessed from its extension.
async fn serve_file(path: &Path, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        videos: state.index.len(),
    })
}

/// An uploaded video spooled to disk. The file is deleted on drop.
struct Upload {
    file: NamedTempFile,
    filename: String,
}

async fn read_form(
    multipart: &mut Multipart,
    uploads_dir: &Path,
) -> ApiResult<(Option<Upload>, Option<Vec<String>>)> {
    let mut upload = None;
    let mut suggested_labels = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("video") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    return Err(ApiError::bad_request("No selected file"));
                }
                // ffmpeg detects the format from content, the suffix is only a hint.
                let suffix = Path::new(&filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                let mut file = tempfile::Builder::new()
                    .prefix("upload_")
                    .suffix(&suffix)
                    .tempfile_in(uploads_dir)
                    .map_err(|e| ApiError::internal(format!("Failed to spool upload: {e}")))?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?
                {
                    file.write_all(&chunk)
                        .map_err(|e| ApiError::internal(format!("Failed to spool upload: {e}")))?;
                }
                file.flush()
                    .map_err(|e| ApiError::internal(format!("Failed to spool upload: {e}")))?;
                upload = Some(Upload { file, filename });
            }
            Some("suggested_labels") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                match serde_json::from_str::<Vec<String>>(&text) {
                    Ok(labels) => {
                        info!("Received suggested labels: {labels:?}");
                        suggested_labels = Some(labels);
                    }
                    Err(e) => warn!("Could not parse suggested labels {text:?}: {e}"),
                }
            }
            _ => {}
        }
    }
    Ok((upload, suggested_labels))
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed partial output {path:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {path:?}: {e}"),
    }
}

/// Where a run writes its output, fixed before the pipeline starts.
struct RunPlan {
    run_id: u64,
    video_file: String,
    output: PathBuf,
    suggested_labels: Option<Vec<String>>,
}

/// Runs the pipeline, persists the result record and commits the run.
///
/// Called on a blocking worker, so it completes even when the request that
/// started it is dropped. Nothing is left on disk unless the commit succeeds.
fn run_upload(
    pipeline: &Mutex<DetectionPipeline>,
    index: &VideoIndex,
    upload: Upload,
    plan: RunPlan,
) -> ApiResult<ResultRecord> {
    let results_path = results_path_for(&plan.output);
    let results_file = results_path_for(Path::new(&plan.video_file))
        .to_string_lossy()
        .into_owned();

    let outcome = {
        let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        pipeline.process(upload.file.path(), &plan.output, plan.suggested_labels)
    };
    let committed = outcome.map_err(ApiError::from).and_then(|record| {
        record.write_atomic(&results_path)?;
        index.commit(RunEntry {
            run_id: plan.run_id,
            video_file: plan.video_file,
            results_file,
            completed_at: Utc::now(),
        })?;
        Ok(record)
    });

    if committed.is_err() {
        discard(&plan.output);
        discard(&results_path);
    }
    committed
}

async fn process_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let (upload, suggested_labels) = read_form(&mut multipart, &state.config.uploads_dir).await?;
    let upload = upload.ok_or_else(|| ApiError::bad_request("No video file provided"))?;

    let run_id = state.index.allocate_run_id()?;
    let video_file = format!("{run_id}_out.{}", state.config.output_extension);
    info!("Processing {:?} as run {run_id}", upload.filename);

    let plan = RunPlan {
        run_id,
        video_file: video_file.clone(),
        output: state.config.processed_dir.join(&video_file),
        suggested_labels,
    };
    let pipeline = state.pipeline.clone();
    let index = state.index.clone();
    let record = tokio::task::spawn_blocking(move || run_upload(&pipeline, &index, upload, plan))
        .await
        .map_err(|e| ApiError::internal(format!("Processing task failed: {e}")))??;
    info!(
        "Run {run_id} done, detected labels: {:?}",
        record.detected_labels
    );

    Ok(Json(ProcessResponse {
        success: true,
        video_number: run_id,
        video: VideoInfo {
            video_url: video_url(&video_file),
            filename: video_file,
            detected_labels: record.detected_labels,
        },
    }))
}

async fn latest_video(State(state): State<AppState>) -> ApiResult<Json<LatestResponse>> {
    let entry = state
        .index
        .latest()
        .ok_or_else(|| ApiError::not_found("No processed videos found"))?;
    Ok(Json(LatestResponse {
        success: true,
        video: video_info(&state.index, &entry),
    }))
}

async fn all_videos(State(state): State<AppState>) -> Json<AllVideosResponse> {
    let videos: Vec<VideoInfo> = state
        .index
        .list()
        .iter()
        .map(|entry| video_info(&state.index, entry))
        .collect();
    Json(AllVideosResponse {
        success: !videos.is_empty(),
        videos,
    })
}

/// Committed videos only. Uncommitted outputs and the index stay private.
async fn processed_video(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
    request: Request,
) -> ApiResult<Response> {
    let entry = state
        .index
        .find_by_video_file(&filename)
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    Ok(serve_file(&state.index.video_path(&entry), request).await)
}

async fn download_video(
    State(state): State<AppState>,
    UrlPath(video_id): UrlPath<String>,
    request: Request,
) -> ApiResult<Response> {
    let entry = video_id
        .parse()
        .ok()
        .and_then(|run_id| state.index.get(run_id))
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    let path = state.index.video_path(&entry);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::not_found("Video file not found"));
    }

    let extension = Path::new(&entry.video_file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"processed_video.{extension}\""))
            .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut response = serve_file(&path, request).await;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}
