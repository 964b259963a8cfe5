use axum::response::{Html, IntoResponse};

const INDEX_HTML: &str = include_str!("../../../assets/index.html");

// axum handler for the landing page
pub async fn root() -> impl IntoResponse {
    Html(INDEX_HTML)
}
