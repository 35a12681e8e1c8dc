use thiserror::Error;
use url::Url;

use super::NewRequest;

const MAX_URL_LEN: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("url exceeds {MAX_URL_LEN} characters")]
    UrlTooLong,
    #[error("url '{0}' is not well-formed")]
    MalformedUrl(String),
    #[error("url '{0}' must use http or https")]
    UnsupportedScheme(String),
    #[error("url '{0}' has no host")]
    MissingHost(String),
    #[error("callback: {0}")]
    Callback(Box<RequestValidationError>),
}

/// Parse `raw` as an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url, RequestValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RequestValidationError::EmptyUrl);
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(RequestValidationError::UrlTooLong);
    }

    let url = Url::parse(trimmed)
        .map_err(|_| RequestValidationError::MalformedUrl(trimmed.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RequestValidationError::UnsupportedScheme(trimmed.to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(RequestValidationError::MissingHost(trimmed.to_string()));
    }

    Ok(url)
}

/// Normalised url and callback of a valid request.
pub fn validate_request(
    request: &NewRequest,
) -> Result<(String, Option<String>), RequestValidationError> {
    let url = validate_url(&request.url)?;

    let callback = match request.callback.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            validate_url(raw)
                .map_err(|e| RequestValidationError::Callback(Box::new(e)))?
                .to_string(),
        ),
    };

    Ok((url.to_string(), callback))
}
