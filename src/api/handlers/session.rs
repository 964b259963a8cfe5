use super::MessageBody;
use crate::{
    api::AppState,
    session::{Credential, Profile},
};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

pub const MSG_LOGGED_IN: &str = "Logged in";
pub const MSG_LOGGED_OUT: &str = "Not logged in";
pub const MSG_LOGOUT: &str = "Logged out";

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LoginStatus {
    pub is_logged_in: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedeuserid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Avatar image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl LoginStatus {
    #[must_use]
    pub fn from_credential(credential: &Credential) -> Self {
        match credential.user_id() {
            Some(user_id) => Self {
                is_logged_in: true,
                message: MSG_LOGGED_IN.to_string(),
                dedeuserid: Some(user_id.to_string()),
                nickname: None,
                avatar: None,
            },
            None => Self {
                is_logged_in: false,
                message: MSG_LOGGED_OUT.to_string(),
                dedeuserid: None,
                nickname: None,
                avatar: None,
            },
        }
    }

    /// Attach the account profile; ignored while logged out.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<Profile>) -> Self {
        if let (true, Some(profile)) = (self.is_logged_in, profile) {
            self.nickname = Some(profile.nickname);
            self.avatar = Some(profile.avatar);
        }
        self
    }
}

#[utoipa::path(
    post,
    path= "/logout",
    responses (
        (status = 200, description = "Session cleared and logout recorded", body = MessageBody)
    ),
    tag = "login",
)]
#[instrument(skip(state))]
pub async fn logout(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<MessageBody>) {
    state.store.clear().await;
    info!("logged out");

    (
        StatusCode::OK,
        Json(MessageBody {
            message: MSG_LOGOUT.to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path= "/check_login_status",
    responses (
        (status = 200, description = "Current session, verified with the platform", body = LoginStatus)
    ),
    tag = "login",
)]
#[instrument(skip(state))]
pub async fn check_login_status(
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<LoginStatus>) {
    let (credential, profile) = state.verified_session().await;
    (
        StatusCode::OK,
        Json(LoginStatus::from_credential(&credential).with_profile(profile)),
    )
}
