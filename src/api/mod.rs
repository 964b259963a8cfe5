use crate::{
    gateway::LoginGateway,
    qr::{ChallengeRegistry, DEFAULT_POLL_INTERVAL},
    session::{Credential, CredentialStore, Profile, SessionCheck},
    video::VideoClient,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, options, post},
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug, debug_span, info, warn, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod handlers;

use handlers::{health, qrcode, root, session, video};

/// Shared state handed to every handler through `Extension<Arc<AppState>>`.
pub struct AppState {
    pub registry: Arc<ChallengeRegistry>,
    pub store: Arc<CredentialStore>,
    pub gateway: Arc<dyn LoginGateway>,
    pub video: VideoClient,
    pub poll_interval: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(store: CredentialStore, gateway: Arc<dyn LoginGateway>, video: VideoClient) -> Self {
        Self {
            registry: Arc::new(ChallengeRegistry::new()),
            store: Arc::new(store),
            gateway,
            video,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current credential, checked against the platform.
    ///
    /// A session the platform explicitly reports as logged out is expired
    /// (cleared and closed in the log). Any other failure keeps it.
    pub async fn verified_session(&self) -> (Credential, Option<Profile>) {
        let credential = self.store.get().await;
        let Some(user_id) = credential.user_id().map(str::to_string) else {
            return (credential, None);
        };

        match self.video.nav(&credential).await {
            SessionCheck::Accepted(profile) => (credential, Some(profile)),
            SessionCheck::Rejected => {
                warn!(%user_id, "platform no longer accepts the session, logging out");
                self.store.expire(&user_id).await;
                (self.store.get().await, None)
            }
            SessionCheck::Inconclusive => {
                debug!(%user_id, "session check inconclusive, keeping session");
                (credential, None)
            }
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        qrcode::generate_qrcode,
        qrcode::get_qrcode_image,
        qrcode::get_status,
        session::logout,
        session::check_login_status,
        video::parse_video,
        video::parse_videos,
        video::download,
    ),
    components(schemas(
        health::Health,
        handlers::ErrorBody,
        handlers::MessageBody,
        qrcode::QrCodeIssued,
        session::LoginStatus,
        crate::qr::ChallengeSnapshot,
        crate::qr::ChallengeStatus,
        video::DownloadBody,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "login", description = "QR code login and session"),
        (name = "video", description = "Video metadata and download"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the application router with its middleware stack.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health))
        .route("/generate_qrcode", get(qrcode::generate_qrcode))
        .route("/get_qrcode_image", get(qrcode::get_qrcode_image))
        .route("/get_status", get(qrcode::get_status))
        .route("/logout", post(session::logout))
        .route("/check_login_status", get(session::check_login_status))
        .route("/parse_video", get(video::parse_video))
        .route("/parse_videos", get(video::parse_videos))
        .route("/download", get(video::download))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        )
        // outside the CORS layer, which would answer OPTIONS itself
        .route("/health", options(health::health))
        .layer(Extension(state))
}

/// Serve the API on `port` until Ctrl-C.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
