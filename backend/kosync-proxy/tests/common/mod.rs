#![allow(dead_code)]

pub mod mock_library;
pub mod mock_session_store;

use chrono::{DateTime, Duration, TimeZone, Utc};
use kosync_proxy::models::{SyncDirection, SyncEvent};

/// Fixed starting point for test timelines
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

pub fn event(user_id: i64, book_id: i64, progress: f64, when: DateTime<Utc>) -> SyncEvent {
    SyncEvent {
        user_id,
        book_id,
        book_type: "EPUB".to_string(),
        progress,
        location: format!("/body/DocFragment[{}]", (progress * 100.0) as i64),
        direction: SyncDirection::Push,
        event_time: when,
    }
}

pub fn pull(user_id: i64, book_id: i64, progress: f64, when: DateTime<Utc>) -> SyncEvent {
    SyncEvent {
        direction: SyncDirection::Pull,
        ..event(user_id, book_id, progress, when)
    }
}
