pub mod health;
pub mod qrcode;
pub mod root;
pub mod session;
pub mod video;

// common types for the handlers
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub message: String,
}

pub type ErrorResponse = (StatusCode, Json<ErrorBody>);

pub fn error_response(status: StatusCode, error: impl Into<String>) -> ErrorResponse {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
        }),
    )
}
