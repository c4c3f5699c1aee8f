//! Session tracking data model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the sync protocol produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// `PUT /syncs/progress`: the reader uploaded its position
    Push,
    /// `GET /syncs/progress/{document}`: the reader fetched its position
    Pull,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active sessions are keyed per reader and per book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: i64,
    pub book_id: i64,
}

impl SessionKey {
    pub fn new(user_id: i64, book_id: i64) -> Self {
        Self { user_id, book_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={}, book={}", self.user_id, self.book_id)
    }
}

/// A progress read or write the upstream confirmed, normalized for the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub user_id: i64,
    pub book_id: i64,
    pub book_type: String,
    /// Fraction of the book, 0.0 to 1.0
    pub progress: f64,
    /// Reader-specific position marker (xpointer, page label, ...)
    pub location: String,
    pub direction: SyncDirection,
    pub event_time: DateTime<Utc>,
}

impl SyncEvent {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.user_id, self.book_id)
    }
}

/// In-memory state of an unfinished reading session
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub start_progress: f64,
    pub end_progress: f64,
    pub start_location: String,
    pub end_location: String,
    pub book_type: String,
    pub start_time: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
}

impl ActiveSession {
    /// Open a session at the position reported by `event`
    pub fn start(event: &SyncEvent) -> Self {
        Self {
            start_progress: event.progress,
            end_progress: event.progress,
            start_location: event.location.clone(),
            end_location: event.location.clone(),
            book_type: event.book_type.clone(),
            start_time: event.event_time,
            last_activity_time: event.event_time,
        }
    }

    /// Extend the session with a newer event.
    ///
    /// Returns `false` when the event is older than the last recorded activity;
    /// such events leave the session untouched so the end position always
    /// reflects the most recent observation.
    pub fn absorb(&mut self, event: &SyncEvent) -> bool {
        if event.event_time < self.last_activity_time {
            return false;
        }
        self.end_progress = event.progress;
        self.end_location = event.location.clone();
        self.last_activity_time = event.event_time;
        true
    }

    /// Time elapsed since the last observed activity
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity_time
    }

    pub fn complete(self, key: SessionKey) -> CompletedSession {
        let duration_seconds = (self.last_activity_time - self.start_time).num_seconds();
        CompletedSession {
            user_id: key.user_id,
            book_id: key.book_id,
            book_type: self.book_type,
            start_progress: self.start_progress,
            end_progress: self.end_progress,
            progress_delta: self.end_progress - self.start_progress,
            duration_seconds,
            started_at: self.start_time,
            ended_at: self.last_activity_time,
            start_location: self.start_location,
            end_location: self.end_location,
        }
    }
}

/// Immutable summary of a finished reading session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSession {
    pub user_id: i64,
    pub book_id: i64,
    pub book_type: String,
    pub start_progress: f64,
    pub end_progress: f64,
    pub progress_delta: f64,
    pub duration_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub start_location: String,
    pub end_location: String,
}

impl CompletedSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.user_id, self.book_id)
    }
}
