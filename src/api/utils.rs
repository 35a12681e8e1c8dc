//! API utility functions
//!
//! Pure, stateless helpers for request parsing and response headers.

use axum::http::HeaderValue;

use crate::api::error::ApiError;
use crate::models::Download;

/// Parses and validates a request Content-Type header for application/json
///
/// Accepts:
/// - `application/json`
/// - `application/json; charset=utf-8`
///
/// Rejects:
/// - `application/jsonp`
/// - `application/json-patch+json`
/// - `text/json`
/// - Malformed media types
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Content-Type for a finished download's data; unrecorded or unparseable
/// MIME types fall back to `application/octet-stream`
pub fn content_type_for(download: &Download) -> HeaderValue {
    download
        .metadata
        .mime_type
        .as_deref()
        .and_then(|raw| raw.parse::<mime::Mime>().ok())
        .and_then(|m| HeaderValue::from_str(m.as_ref()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"))
}

/// Declared size, or the bytes actually read when the source declared none
pub fn content_length_for(download: &Download) -> u64 {
    download
        .metadata
        .size
        .filter(|size| *size > 0)
        .unwrap_or_else(|| download.bytes_read())
}
