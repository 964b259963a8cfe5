#![allow(clippy::unwrap_used)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use bilidown::{
    api::{router, AppState},
    gateway::BilibiliGateway,
    session::{CredentialStore, LoginLog},
    video::VideoClient,
};
use serde_json::{json, Value};
use std::{net::TcpListener, path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn build(upstream: &str, log: &Path, download: &Path) -> (Arc<AppState>, Router) {
    let store = CredentialStore::restore(LoginLog::new(log)).await;
    let state = Arc::new(
        AppState::new(
            store,
            Arc::new(BilibiliGateway::new(upstream).unwrap()),
            VideoClient::new(upstream, download).unwrap(),
        )
        .with_poll_interval(Duration::from_millis(20)),
    );
    let app = router(state.clone());
    (state, app)
}

async fn mock_passport(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/x/passport-login/web/qrcode/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "url": "https://passport.bilibili.com/h5-app/passport/login/scan", "qrcode_key": "k-42" }
        })))
        .mount(server)
        .await;

    // two "not scanned" replies, then the confirmation redirect
    Mock::given(method("GET"))
        .and(path("/x/passport-login/web/qrcode/poll"))
        .and(query_param("qrcode_key", "k-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "url": "", "code": 86101, "message": "not scanned" }
        })))
        .up_to_n_times(2)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/passport-login/web/qrcode/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "url": format!("{}/crossDomain?DedeUserID=4242", server.uri()), "code": 0 }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/crossDomain"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "DedeUserID=4242; Path=/")
                .append_header("Set-Cookie", "bili_jct=csrf-token; Path=/")
                .append_header("Set-Cookie", "SESSDATA=sess; Path=/; HttpOnly")
                .set_body_string("ok"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn qr_login_persists_and_survives_restart() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = MockServer::start().await;
    mock_passport(&server).await;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("login_data.csv");
    let download = dir.path().join("download");
    let (state, app) = build(&server.uri(), &log, &download).await;

    let (status, issued) = call(&app, "GET", "/generate_qrcode").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["is_logged_in"], false);
    assert_eq!(issued["qrcode_key"], "k-42");

    let mut last = Value::Null;
    for _ in 0..250 {
        let (_, body) = call(&app, "GET", "/get_status?qrcode_key=k-42").await;
        last = body;
        if ["success", "expired", "error"].contains(&last["status"].as_str().unwrap_or_default()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last, json!({ "status": "success", "message": "Login successful" }));

    let (_, session) = call(&app, "GET", "/check_login_status").await;
    assert_eq!(
        session,
        json!({ "is_logged_in": true, "message": "Logged in", "dedeuserid": "4242" })
    );

    // a second generate short-circuits to the live session
    let (_, again) = call(&app, "GET", "/generate_qrcode").await;
    assert_eq!(again["dedeuserid"], "4242");
    assert_eq!(state.registry.len().await, 1);

    // restart without logging out
    drop(app);
    let (_, restarted) = build(&server.uri(), &log, &download).await;
    let (_, session) = call(&restarted, "GET", "/check_login_status").await;
    assert_eq!(session["dedeuserid"], "4242");

    let (status, body) = call(&restarted, "POST", "/logout").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");

    // restart after logging out
    let (_, restarted) = build(&server.uri(), &log, &download).await;
    let (_, session) = call(&restarted, "GET", "/check_login_status").await;
    assert_eq!(session["is_logged_in"], false);

    let lines: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("4242,csrf-token,"));
    assert!(lines[1].starts_with("Unknown,Unknown,Unknown,0,"));
}

#[tokio::test]
async fn parse_video_sends_session_cookies() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(header_regex("cookie", "SESSDATA=sess"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "bvid": "BV1xx411c7mD", "cid": 9, "title": "t", "desc": "d", "tname": "Tech" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/player/playurl"))
        .and(query_param("cid", "9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "quality": 80 } })),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("login_data.csv");
    std::fs::write(
        &log,
        "7,csrf,DedeUserID=7; SESSDATA=sess,1,2026-01-01 00:00:00\n",
    )
    .unwrap();
    let (_, app) = build(&server.uri(), &log, &dir.path().join("download")).await;

    let (status, body) = call(&app, "GET", "/parse_video?input=BV1xx411c7mD").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "bvid": "BV1xx411c7mD",
            "cid": 9,
            "title": "t",
            "desc": "d",
            "type": "Tech",
            "play_info": { "quality": 80 }
        })
    );
}

#[tokio::test]
async fn stale_restored_session_is_expired_once_rejected() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/nav"))
        .and(header_regex("cookie", "SESSDATA=stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": -101,
            "data": { "isLogin": false }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("login_data.csv");
    std::fs::write(
        &log,
        "7,csrf,DedeUserID=7; SESSDATA=stale,1,2026-01-01 00:00:00\n",
    )
    .unwrap();
    let download = dir.path().join("download");

    let (state, _) = build(&server.uri(), &log, &download).await;
    assert!(state.store.is_logged_in().await);

    // the startup check
    let (credential, profile) = state.verified_session().await;
    assert!(!credential.is_logged_in());
    assert!(profile.is_none());
    assert!(!state.store.is_logged_in().await);

    let (_, restarted) = build(&server.uri(), &log, &download).await;
    let (_, session) = call(&restarted, "GET", "/check_login_status").await;
    assert_eq!(
        session,
        json!({ "is_logged_in": false, "message": "Not logged in" })
    );

    let contents = std::fs::read_to_string(&log).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.lines().last().unwrap().starts_with("Unknown,Unknown,Unknown,0,"));
}
