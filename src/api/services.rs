use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use uuid::Uuid;

use super::{
    models::{DownloadList, DownloadView, HealthResponse, RequestList, RequestView},
    state::AppState,
    utils::{content_length_for, content_type_for, parse_content_type, validate_body_size},
};
use crate::api::error::ApiError;
use crate::requests::NewRequest;

const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Ids that do not parse can never exist
fn parse_id(raw: &str, kind: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{kind} {raw}")))
}

/// List downloads (GET /download/)
pub async fn list_downloads(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let downloads = state
        .engine
        .list_all()
        .await?
        .into_iter()
        .map(|download| DownloadView::new(download, state.links.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(DownloadList { downloads }))
}

/// Download metadata and status (GET /download/{id})
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let download = state.engine.find_by_id(parse_id(&id, "download")?).await?;
    Ok(Json(DownloadView::new(download, state.links.as_ref())?))
}

/// Raw content of a finished download (GET /download/{id}/data)
///
/// - 200 with the stored bytes once Finished
/// - 204 while Queued/InProgress, and for Failed downloads
/// - 404 for unknown ids
pub async fn get_download_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let download = state.engine.find_by_id(parse_id(&id, "download")?).await?;
    let reader = state.engine.get_reader(&download).await?;

    let mut response = Body::from_stream(reader).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type_for(&download));
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(content_length_for(&download)),
    );

    Ok(response)
}

/// Submit a fetch request (POST /request/)
///
/// Body: `{"url": "...", "callback": "..."}` with `callback` optional.
/// Answers 202 with the created request and a Location header, 400 for a
/// malformed request and 429 when the queue is full.
pub async fn submit_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    let body_bytes = read_body(body).await?;
    let new_request: NewRequest = serde_json::from_slice(&body_bytes)?;

    let submitted = state.requests.submit(new_request).await?;
    let view = RequestView::new(submitted.request, state.links.as_ref())?;

    let mut response = (StatusCode::ACCEPTED, Json(&view)).into_response();
    if let Some(location) = view.self_link().and_then(|l| HeaderValue::from_str(l).ok()) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// Reads request body and validates size
///
/// Decompression is handled by the RequestDecompressionLayer middleware.
async fn read_body(body: Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes()
        .to_vec();

    validate_body_size(&data, MAX_PAYLOAD_SIZE)?;

    Ok(data)
}

/// List requests (GET /request/)
pub async fn list_requests(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let requests = state
        .requests
        .list_all()
        .await?
        .into_iter()
        .map(|request| RequestView::new(request, state.links.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(RequestList { requests }))
}

/// One request (GET /request/{id})
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.requests.find_by_id(parse_id(&id, "request")?).await?;
    Ok(Json(RequestView::new(request, state.links.as_ref())?))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 once the engine has stopped accepting work.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    let engine = if state.engine.is_accepting() {
        "healthy"
    } else {
        "shutting_down"
    };
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("engine".to_string(), engine.to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let (status_code, overall) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: overall.to_string(),
        components,
        queued: state.engine.queued(),
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
