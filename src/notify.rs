use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Failure,
}

/// A transient user-visible message
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub raised_at: Instant,
}

/// Holds at most one notice; a newer notice replaces the older one
pub struct Notifier {
    ttl: Duration,
    current: Option<Notice>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Notifier { ttl, current: None }
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.raise(NoticeKind::Success, message.into());
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.raise(NoticeKind::Failure, message.into());
    }

    fn raise(&mut self, kind: NoticeKind, message: String) {
        self.current = Some(Notice {
            kind,
            message,
            raised_at: Instant::now(),
        });
    }

    /// The notice to display at `now`, if it hasn't auto-dismissed yet
    pub fn visible(&self, now: Instant) -> Option<&Notice> {
        self.current
            .as_ref()
            .filter(|notice| now.saturating_duration_since(notice.raised_at) < self.ttl)
    }

    /// Most recent notice regardless of expiry
    pub fn last(&self) -> Option<&Notice> {
        self.current.as_ref()
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }
}
