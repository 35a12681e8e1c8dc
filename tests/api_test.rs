use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use downloaderd::api::models::{DownloadList, DownloadView, RequestView};
use downloaderd::api::{Daemon, router};
use downloaderd::config::{Config, MetadataBackend, StorageProvider};

/// In-memory metadata and blobs; nothing touches disk
fn test_config(queue_length: usize) -> Config {
    let mut config = Config::default();
    config.metadata.backend = MetadataBackend::Memory;
    config.storage.provider = StorageProvider::Memory;
    config.server.public_url = Some("http://downloads.test".into());
    config.engine.queue_length = queue_length;
    config.engine.max_attempts = 1;
    config
}

/// Builds the router over a daemon whose workers are not started, so
/// submitted downloads stay `Queued`
fn build_test_app(queue_length: usize) -> (Router, Daemon) {
    let daemon = Daemon::build(test_config(queue_length)).expect("Failed to build daemon");
    (router(daemon.state.clone()), daemon)
}

fn post_request(body: Value) -> Request<Body> {
    Request::builder()
        .uri("/request/")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_submit_request_returns_accepted_with_location() {
    let (app, _daemon) = build_test_app(10);

    let response = app
        .oneshot(post_request(json!({
            "url": "https://cdn.example.com/image.jpg",
            "callback": "https://hooks.example.com/done",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("missing Location header");

    let view: RequestView = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(location, format!("http://downloads.test/request/{}", view.id));
    assert_eq!(view.url, "https://cdn.example.com/image.jpg");
    assert_eq!(view.callback.as_deref(), Some("https://hooks.example.com/done"));
    assert!(
        view.links
            .iter()
            .any(|l| l.rel == "download"
                && l.href == format!("http://downloads.test/download/{}", view.download_id))
    );
}

#[tokio::test]
async fn test_submitted_request_and_download_are_readable() {
    let (app, _daemon) = build_test_app(10);

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": "https://cdn.example.com/a.bin" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created: RequestView = serde_json::from_slice(&body_bytes(response).await).unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/request/{}", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: RequestView = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(fetched.id, created.id);
    assert!(fetched.callback.is_none());

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}", created.download_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let download: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(download["status"]["state"], "queued");
    assert_eq!(download["terminal"], false);

    let response = app.oneshot(get("/download/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list: DownloadList = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(list.downloads.len(), 1);
    assert_eq!(list.downloads[0].id, created.download_id);
}

#[tokio::test]
async fn test_data_of_queued_download_is_no_content() {
    let (app, _daemon) = build_test_app(10);

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": "https://cdn.example.com/a.bin" })))
        .await
        .unwrap();
    let created: RequestView = serde_json::from_slice(&body_bytes(response).await).unwrap();

    let response = app
        .oneshot(get(&format!("/download/{}/data", created.download_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (app, _daemon) = build_test_app(10);
    let id = uuid::Uuid::now_v7();

    for uri in [
        format!("/download/{id}"),
        format!("/download/{id}/data"),
        format!("/request/{id}"),
        "/download/not-a-uuid".to_string(),
        "/request/not-a-uuid".to_string(),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");

        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let (app, daemon) = build_test_app(10);

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": "ftp://example.com/file" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["code"], "INVALID_PAYLOAD");

    let response = app
        .clone()
        .oneshot(post_request(json!({ "callback": "https://hooks.example.com" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing_content_type = Request::builder()
        .uri("/request/")
        .method("POST")
        .body(Body::from(json!({ "url": "https://example.com" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(missing_content_type).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/request/")
                .method("POST")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("https://example.com"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing was recorded for any of them
    assert!(daemon.state.requests.list_all().await.unwrap().is_empty());
    assert!(daemon.state.engine.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_queue_is_too_many_requests() {
    let (app, daemon) = build_test_app(1);

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": "https://example.com/one" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": "https://example.com/two" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["code"], "QUEUE_FULL");

    // The rejected submission left no records behind
    assert_eq!(daemon.state.requests.list_all().await.unwrap().len(), 1);
    assert_eq!(daemon.state.engine.list_all().await.unwrap().len(), 1);
    assert_eq!(daemon.state.metrics.snapshot().downloads_rejected, 1);
}

#[tokio::test]
async fn test_finished_download_serves_content() {
    let source = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/report.csv"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"a,b\n1,2\n".to_vec(), "text/csv"),
        )
        .mount(&source)
        .await;

    let (app, daemon) = build_test_app(10);
    let mut events = daemon.state.engine.subscribe();
    daemon.start().await;

    let response = app
        .clone()
        .oneshot(post_request(json!({ "url": format!("{}/report.csv", source.uri()) })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created: RequestView = serde_json::from_slice(&body_bytes(response).await).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.id(), created.download_id);

    let response = app
        .clone()
        .oneshot(get(&format!("/download/{}", created.download_id)))
        .await
        .unwrap();
    let view: DownloadView = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(view.terminal);
    assert_eq!(view.metadata.mime_type.as_deref(), Some("text/csv"));

    let response = app
        .oneshot(get(&format!("/download/{}/data", created.download_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "8");
    assert_eq!(body_bytes(response).await, b"a,b\n1,2\n");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, daemon) = build_test_app(10);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health.get("status").and_then(|v| v.as_str()), Some("healthy"));
    assert!(health.get("version").is_some());
    assert_eq!(health["queued"], 0);

    let components = health.get("components").unwrap().as_object().unwrap();
    assert!(components.contains_key("api"));
    assert!(components.contains_key("engine"));

    daemon.shutdown().await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
