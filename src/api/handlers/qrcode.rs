use super::{error_response, ErrorBody, ErrorResponse};
use crate::{
    api::{handlers::session::LoginStatus, AppState},
    qr::{render, ChallengeSnapshot, ChallengeStatus, LoginPoller},
};
use axum::{
    extract::{Extension, Query},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use url::form_urlencoded::byte_serialize;
use utoipa::{IntoParams, ToSchema};

pub const MSG_NOT_FOUND: &str = "QR code not found";

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct QrCodeArgs {
    /// Token returned by `/generate_qrcode`
    qrcode_key: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct QrCodeIssued {
    is_logged_in: bool,
    qrcode_key: String,
    /// Relative URL of the PNG for this token
    qrcode_url: String,
}

#[utoipa::path(
    get,
    path= "/generate_qrcode",
    responses (
        (status = 200, description = "New QR challenge, or the current session if already logged in", body = QrCodeIssued),
        (status = 500, description = "Gateway did not issue a challenge", body = ErrorBody)
    ),
    tag = "login",
)]
#[instrument(skip(state))]
pub async fn generate_qrcode(Extension(state): Extension<Arc<AppState>>) -> Response {
    let (credential, profile) = state.verified_session().await;

    if credential.is_logged_in() {
        debug!("already logged in, skipping QR challenge");
        return (
            StatusCode::OK,
            Json(LoginStatus::from_credential(&credential).with_profile(profile)),
        )
            .into_response();
    }

    let Some(challenge) = state.gateway.generate(&credential).await else {
        error!("Login gateway did not issue a QR challenge");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR code")
            .into_response();
    };

    let poller = LoginPoller::new(
        challenge.qrcode_key.clone(),
        state.gateway.clone(),
        state.registry.clone(),
        state.store.clone(),
    )
    .with_interval(state.poll_interval);

    if !poller.spawn().await {
        debug!(qrcode_key = %challenge.qrcode_key, "challenge already being polled");
    }

    let encoded: String = byte_serialize(challenge.qrcode_key.as_bytes()).collect();

    (
        StatusCode::OK,
        Json(QrCodeIssued {
            is_logged_in: false,
            qrcode_url: format!("/get_qrcode_image?qrcode_key={encoded}"),
            qrcode_key: challenge.qrcode_key,
        }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path= "/get_qrcode_image",
    params(QrCodeArgs),
    responses (
        (status = 200, description = "PNG image of the scan URL"),
        (status = 404, description = "Unknown token", body = ErrorBody),
        (status = 500, description = "Rendering failed", body = ErrorBody)
    ),
    tag = "login",
)]
#[instrument(skip(state))]
pub async fn get_qrcode_image(
    Extension(state): Extension<Arc<AppState>>,
    Query(args): Query<QrCodeArgs>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let qrcode_key = known_key(&state, args).await.ok_or_else(|| {
        debug!("image requested for unknown token");
        error_response(StatusCode::NOT_FOUND, MSG_NOT_FOUND)
    })?;

    let png = render::render_png(&render::scan_url(&qrcode_key)).map_err(|err| {
        error!("Failed to render QR code: {:#}", err);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to render QR code")
    })?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static("image/png"))],
        png,
    ))
}

#[utoipa::path(
    get,
    path= "/get_status",
    params(QrCodeArgs),
    responses (
        (status = 200, description = "Current challenge status", body = ChallengeSnapshot),
        (status = 404, description = "Unknown token", body = ChallengeSnapshot)
    ),
    tag = "login",
)]
#[instrument(skip(state))]
pub async fn get_status(
    Extension(state): Extension<Arc<AppState>>,
    Query(args): Query<QrCodeArgs>,
) -> (StatusCode, Json<ChallengeSnapshot>) {
    let snapshot = match args.qrcode_key.as_deref() {
        Some(key) => state.registry.get(key).await,
        None => None,
    };

    match snapshot {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)),
        None => (
            StatusCode::NOT_FOUND,
            Json(ChallengeSnapshot {
                status: ChallengeStatus::Error,
                message: MSG_NOT_FOUND.to_string(),
            }),
        ),
    }
}

async fn known_key(state: &AppState, args: QrCodeArgs) -> Option<String> {
    let key = args.qrcode_key?;
    state.registry.get(&key).await.map(|_| key)
}
