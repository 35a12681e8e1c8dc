//! Download record and its lifecycle state machine.
//!
//! A download moves `Queued -> InProgress -> {Finished, Failed}`. A queued
//! download may also fail directly when its source can never be opened or the
//! engine shuts down before a worker picks it up. Terminal records are frozen:
//! every mutating method returns [`TransitionError`] once `is_terminal()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Queued,
    InProgress,
    Finished,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Finished | DownloadState::Failed)
    }

    pub fn can_transition_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Queued, InProgress) | (Queued, Failed) | (InProgress, Finished) | (InProgress, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::Queued => "queued",
            DownloadState::InProgress => "in_progress",
            DownloadState::Finished => "finished",
            DownloadState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal {
        from: DownloadState,
        to: DownloadState,
    },

    #[error("progress recorded while {0}")]
    NotInProgress(DownloadState),

    #[error("read {read} bytes, declared size is {declared}")]
    SizeExceeded { read: u64, declared: u64 },
}

/// What is known about the remote content. Both fields stay `None` until the
/// transfer reveals them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: DownloadState,
    pub bytes_read: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub status: Status,
}

impl Download {
    /// New download in `Queued` state with a time-ordered id.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            url: url.into(),
            created_at: Utc::now(),
            metadata: Metadata::default(),
            status: Status {
                state: DownloadState::Queued,
                bytes_read: 0,
                started_at: None,
                finished_at: None,
                error: None,
            },
        }
    }

    pub fn state(&self) -> DownloadState {
        self.status.state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    pub fn is_finished(&self) -> bool {
        self.status.state == DownloadState::Finished
    }

    pub fn bytes_read(&self) -> u64 {
        self.status.bytes_read
    }

    fn transition(&mut self, next: DownloadState) -> Result<(), TransitionError> {
        let from = self.status.state;
        if !from.can_transition_to(next) {
            return Err(TransitionError::Illegal { from, to: next });
        }
        self.status.state = next;
        Ok(())
    }

    /// `Queued -> InProgress`, recording what the source declared.
    pub fn begin(&mut self, at: DateTime<Utc>, metadata: Metadata) -> Result<(), TransitionError> {
        self.transition(DownloadState::InProgress)?;
        self.status.started_at = Some(at);
        self.metadata = metadata;
        Ok(())
    }

    /// Adds `len` bytes to the counter. Fails, without counting, if the total
    /// would pass the declared size.
    pub fn record_progress(&mut self, len: u64) -> Result<u64, TransitionError> {
        if self.status.state != DownloadState::InProgress {
            return Err(TransitionError::NotInProgress(self.status.state));
        }
        let read = self.status.bytes_read.saturating_add(len);
        if let Some(declared) = self.metadata.size {
            if read > declared {
                return Err(TransitionError::SizeExceeded { read, declared });
            }
        }
        self.status.bytes_read = read;
        Ok(read)
    }

    /// `InProgress -> Finished`. An unknown size is fixed to the bytes read.
    pub fn finish(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(DownloadState::Finished)?;
        if self.metadata.size.is_none() {
            self.metadata.size = Some(self.status.bytes_read);
        }
        self.status.finished_at = Some(at);
        self.status.error = None;
        Ok(())
    }

    /// `Queued | InProgress -> Failed`.
    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(DownloadState::Failed)?;
        self.status.finished_at = Some(at);
        self.status.error = Some(error.into());
        Ok(())
    }
}
