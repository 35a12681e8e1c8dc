use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Pending,
    Delivered,
    Exhausted,
}

impl HookState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, HookState::Pending)
    }
}

/// One webhook notification for a terminal download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRecord {
    pub id: Uuid,
    pub download_id: Uuid,
    pub request_id: Uuid,
    pub callback: String,
    pub state: HookState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HookRecord {
    pub fn new(download_id: Uuid, request_id: Uuid, callback: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            download_id,
            request_id,
            callback: callback.into(),
            state: HookState::Pending,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        self.last_error = None;
        self.state = HookState::Delivered;
    }

    /// Counts a failed attempt; flips to `Exhausted` once `max_attempts` is reached.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>, max_attempts: u32) {
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
        if self.attempts >= max_attempts {
            self.state = HookState::Exhausted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_exhaust_at_ceiling() {
        let mut hook = HookRecord::new(Uuid::now_v7(), Uuid::now_v7(), "http://cb.local/hook");
        hook.record_failure(Utc::now(), "HTTP 500", 3);
        hook.record_failure(Utc::now(), "HTTP 502", 3);
        assert_eq!(hook.state, HookState::Pending);

        hook.record_failure(Utc::now(), "HTTP 503", 3);
        assert_eq!(hook.state, HookState::Exhausted);
        assert_eq!(hook.attempts, 3);
        assert_eq!(hook.last_error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_success_clears_error() {
        let mut hook = HookRecord::new(Uuid::now_v7(), Uuid::now_v7(), "http://cb.local/hook");
        hook.record_failure(Utc::now(), "timeout", 5);
        hook.record_success(Utc::now());

        assert_eq!(hook.state, HookState::Delivered);
        assert!(hook.state.is_terminal());
        assert_eq!(hook.attempts, 2);
        assert!(hook.last_error.is_none());
    }
}
