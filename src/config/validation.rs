use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be at least 1")]
    ZeroCount { field: &'static str },

    #[error("{section}: base delay ({base_ms}ms) exceeds max delay ({max_ms}ms)")]
    BackoffInverted {
        section: &'static str,
        base_ms: u64,
        max_ms: u64,
    },

    #[error(
        "engine.event_capacity ({event_capacity}) must be at least queue_length + workers ({required})"
    )]
    EventCapacityTooSmall {
        event_capacity: usize,
        required: usize,
    },

    #[error("Storage provider is S3 but the bucket name is empty")]
    MissingS3Bucket,

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("server.public_url '{0}' must be an absolute http(s) URL")]
    InvalidPublicUrl(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_engine(config)?;
    validate_hooks(config)?;
    validate_storage(config)?;
    validate_server(config)?;
    Ok(())
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::ZeroCount { field });
    }
    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    let engine = &config.engine;
    require_positive("engine.workers", engine.workers as u64)?;
    require_positive("engine.queue_length", engine.queue_length as u64)?;
    require_positive("engine.chunk_size", engine.chunk_size.as_u64())?;
    require_positive("engine.max_attempts", engine.max_attempts as u64)?;
    require_positive("engine.event_capacity", engine.event_capacity as u64)?;

    if engine.retry_base_delay_ms > engine.retry_max_delay_ms {
        return Err(ValidationError::BackoffInverted {
            section: "engine",
            base_ms: engine.retry_base_delay_ms,
            max_ms: engine.retry_max_delay_ms,
        });
    }

    // Every queued or running download can emit a terminal event before
    // the hook service gets to read any of them.
    let required = engine.queue_length + engine.workers;
    if engine.event_capacity < required {
        return Err(ValidationError::EventCapacityTooSmall {
            event_capacity: engine.event_capacity,
            required,
        });
    }
    Ok(())
}

fn validate_hooks(config: &Config) -> Result<(), ValidationError> {
    let hooks = &config.hooks;
    require_positive("hooks.max_attempts", hooks.max_attempts as u64)?;

    if hooks.base_delay_ms > hooks.max_delay_ms {
        return Err(ValidationError::BackoffInverted {
            section: "hooks",
            base_ms: hooks.base_delay_ms,
            max_ms: hooks.max_delay_ms,
        });
    }
    Ok(())
}

/// Validate bucket and credentials when provider is S3
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3 {
        if config.storage.bucket.is_empty() {
            return Err(ValidationError::MissingS3Bucket);
        }
        if config.storage.access_key.is_none() || config.storage.secret_key.is_none() {
            return Err(ValidationError::MissingS3Credentials);
        }
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let public_url = config.server.public_url();
    match url::Url::parse(&public_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ValidationError::InvalidPublicUrl(public_url)),
    }
}
