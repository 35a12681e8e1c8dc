//! Webhook notifications for terminal downloads.
//!
//! Delivery is at-least-once with bounded retries. Failures stay inside this
//! module: they are recorded on the [`HookRecord`](crate::models::HookRecord),
//! counted in [`Metrics`](crate::observability::Metrics) and logged, and never
//! reach the engine.

mod notifier;
mod service;

pub use notifier::{HookPayload, HttpNotifier, Notifier, PayloadLinks};
pub use service::HookService;

use thiserror::Error;

use crate::links::LinkError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("HTTP request failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("callback returned HTTP {0}")]
    HttpStatus(u16),

    #[error("delivery exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("link resolution failed: {0}")]
    Link(#[from] LinkError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, HookError>;
