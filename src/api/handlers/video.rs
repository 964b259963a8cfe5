use super::{error_response, ErrorBody, ErrorResponse};
use crate::{
    api::AppState,
    video::{self, DEFAULT_QUALITY},
};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, instrument, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct VideoArgs {
    /// Video page URL or bare BV identifier
    input: Option<String>,
}

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct DownloadArgs {
    bvid: Option<String>,
    cid: Option<String>,
    /// DASH quality id, defaults to 80 (1080P)
    quality: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DownloadBody {
    message: String,
    video_file: String,
    audio_file: String,
}

fn video_error(err: &video::Error) -> ErrorResponse {
    if err.is_client_error() {
        warn!("Rejected video request: {}", err);
        error_response(StatusCode::BAD_REQUEST, err.to_string())
    } else {
        error!("Video request failed: {}", err);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[utoipa::path(
    get,
    path= "/parse_video",
    params(VideoArgs),
    responses (
        (status = 200, description = "Metadata summary and raw play info"),
        (status = 400, description = "Empty or unrecognised input, or unknown video", body = ErrorBody),
        (status = 500, description = "Platform did not return play info", body = ErrorBody)
    ),
    tag = "video",
)]
#[instrument(skip(state))]
pub async fn parse_video(
    Extension(state): Extension<Arc<AppState>>,
    Query(args): Query<VideoArgs>,
) -> Result<Json<Value>, ErrorResponse> {
    let credential = state.store.get().await;
    state
        .video
        .parse(args.input.as_deref().unwrap_or_default(), &credential)
        .await
        .map(Json)
        .map_err(|err| video_error(&err))
}

#[utoipa::path(
    get,
    path= "/parse_videos",
    params(VideoArgs),
    responses (
        (status = 200, description = "Flattened metadata with direct stream URLs"),
        (status = 400, description = "Empty or unrecognised input, or unknown video", body = ErrorBody),
        (status = 500, description = "Platform did not return streams", body = ErrorBody)
    ),
    tag = "video",
)]
#[instrument(skip(state))]
pub async fn parse_videos(
    Extension(state): Extension<Arc<AppState>>,
    Query(args): Query<VideoArgs>,
) -> Result<Json<Value>, ErrorResponse> {
    let credential = state.store.get().await;
    state
        .video
        .parse_flat(args.input.as_deref().unwrap_or_default(), &credential)
        .await
        .map(Json)
        .map_err(|err| video_error(&err))
}

#[utoipa::path(
    get,
    path= "/download",
    params(DownloadArgs),
    responses (
        (status = 200, description = "Streams saved", body = DownloadBody),
        (status = 400, description = "Missing or invalid parameters", body = ErrorBody),
        (status = 500, description = "Fetching or writing a stream failed", body = ErrorBody)
    ),
    tag = "video",
)]
#[instrument(skip(state))]
pub async fn download(
    Extension(state): Extension<Arc<AppState>>,
    Query(args): Query<DownloadArgs>,
) -> Result<Json<DownloadBody>, ErrorResponse> {
    let quality = match args.quality.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_QUALITY,
        Some(raw) => raw.parse::<i64>().map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, format!("invalid quality: {raw}"))
        })?,
    };

    let credential = state.store.get().await;
    let files = state
        .video
        .download(
            args.bvid.as_deref().unwrap_or_default(),
            args.cid.as_deref().unwrap_or_default(),
            quality,
            &credential,
        )
        .await
        .map_err(|err| video_error(&err))?;

    Ok(Json(DownloadBody {
        message: "Download complete".to_string(),
        video_file: files.video_file.display().to_string(),
        audio_file: files.audio_file.display().to_string(),
    }))
}
