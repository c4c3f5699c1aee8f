//! Turns forwarded KoSync progress calls into tracker events
//!
//! Only calls the upstream accepted are tracked, so analytics never diverge
//! from what the book server actually stored.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::LibraryDirectory;
use crate::error::AdapterError;
use crate::metrics;
use crate::models::{SyncDirection, SyncEvent};
use crate::services::clock::Clock;
use crate::services::session_tracker::SessionTracker;

/// What the forwarding layer saw for one progress call
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Id assigned by the request tracing middleware
    pub request_id: String,
    pub direction: SyncDirection,
    /// Value of the `x-auth-user` header
    pub username: Option<String>,
    /// Document hash from the URL; for pushes it is read from the payload
    pub document: Option<String>,
    pub upstream_status: u16,
    /// Request body for pushes, upstream response body for pulls
    pub payload: Option<Value>,
}

impl SyncOutcome {
    /// Whether the upstream accepted the call
    pub fn upstream_accepted(&self) -> bool {
        match self.direction {
            SyncDirection::Push => matches!(self.upstream_status, 200 | 202),
            SyncDirection::Pull => self.upstream_status == 200,
        }
    }
}

/// Result of feeding one outcome to the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Recorded(SyncEvent),
    UpstreamRejected(u16),
}

/// Progress fields extracted from a KoSync payload
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub document: String,
    pub percentage: f64,
    pub location: String,
}

pub struct SyncEventAdapter {
    directory: Arc<dyn LibraryDirectory>,
    tracker: Arc<SessionTracker>,
    clock: Arc<dyn Clock>,
}

impl SyncEventAdapter {
    pub fn new(
        directory: Arc<dyn LibraryDirectory>,
        tracker: Arc<SessionTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            tracker,
            clock,
        }
    }

    /// Observe one outcome, logging instead of returning failures.
    ///
    /// This is what the request handlers call; tracking problems must never
    /// surface to the reader.
    pub async fn handle(&self, outcome: SyncOutcome) {
        let direction = outcome.direction;
        let request_id = outcome.request_id.clone();
        match self.observe(outcome).await {
            Ok(Observation::Recorded(_)) => {
                metrics::record_sync_event(direction.as_str(), "recorded");
            }
            Ok(Observation::UpstreamRejected(status)) => {
                metrics::record_sync_event(direction.as_str(), "upstream_rejected");
                debug!(
                    request_id = %request_id,
                    status,
                    direction = %direction,
                    "Upstream rejected sync, not tracking"
                );
            }
            Err(e) => {
                let result = match e {
                    AdapterError::MalformedEvent(_) => "malformed",
                    AdapterError::UnknownUser(_) | AdapterError::UnknownBook(_) => "unknown",
                    AdapterError::Directory(_) => "error",
                };
                metrics::record_sync_event(direction.as_str(), result);
                warn!(
                    request_id = %request_id,
                    direction = %direction,
                    error = %e,
                    "Sync not tracked"
                );
            }
        }
    }

    /// Normalize an outcome and hand it to the tracker
    pub async fn observe(&self, outcome: SyncOutcome) -> Result<Observation, AdapterError> {
        if !outcome.upstream_accepted() {
            return Ok(Observation::UpstreamRejected(outcome.upstream_status));
        }

        let username = outcome
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AdapterError::MalformedEvent("missing x-auth-user".to_string()))?
            .to_string();

        let report = parse_progress(outcome.document.as_deref(), outcome.payload.as_ref())?;
        let event_time = self.clock.now();

        let user_id = self
            .directory
            .find_user_id(&username)
            .await?
            .ok_or_else(|| AdapterError::UnknownUser(username.clone()))?;

        let book = self
            .directory
            .find_book(&report.document)
            .await?
            .ok_or_else(|| AdapterError::UnknownBook(report.document.clone()))?;

        let event = build_event(user_id, book.book_id, book.book_type, &report, outcome.direction, event_time);
        self.tracker.record_event(event.clone()).await;

        Ok(Observation::Recorded(event))
    }
}

fn build_event(
    user_id: i64,
    book_id: i64,
    book_type: String,
    report: &ProgressReport,
    direction: SyncDirection,
    event_time: DateTime<Utc>,
) -> SyncEvent {
    SyncEvent {
        user_id,
        book_id,
        book_type,
        progress: report.percentage,
        location: report.location.clone(),
        direction,
        event_time,
    }
}

/// Extract document, percentage and location from a KoSync progress body.
///
/// `percentage` may be a JSON number or a numeric string; anything else, or a
/// non-finite value, makes the payload malformed.
pub fn parse_progress(
    document: Option<&str>,
    payload: Option<&Value>,
) -> Result<ProgressReport, AdapterError> {
    let payload = payload
        .filter(|p| p.is_object())
        .ok_or_else(|| AdapterError::MalformedEvent("payload is not a JSON object".to_string()))?;

    let document = document
        .map(str::to_string)
        .or_else(|| payload.get("document").and_then(Value::as_str).map(str::to_string))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AdapterError::MalformedEvent("missing document".to_string()))?;

    let percentage = match payload.get("percentage") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| p.is_finite())
    .ok_or_else(|| {
        AdapterError::MalformedEvent(format!(
            "percentage missing or not numeric for document {}",
            document
        ))
    })?;

    let location = match payload.get("progress") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(ProgressReport {
        document,
        percentage,
        location,
    })
}
