//! Persistence of completed reading sessions

use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::error::StoreError;
use crate::models::CompletedSession;

/// Append-only sink for completed sessions.
///
/// Implementations must not buffer: once `append` returns `Ok` the session is
/// durable, which is what lets shutdown guarantee nothing is left behind.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist one completed session, returning its row id
    async fn append(&self, session: &CompletedSession) -> Result<u64, StoreError>;
}

/// Writes sessions into the `reading_sessions` table.
///
/// Progress values arrive as fractions and are stored as percentages rounded
/// to the configured number of decimal places, which is what Booklore's
/// statistics views expect.
pub struct MySqlSessionStore {
    pool: MySqlPool,
    decimal_places: u32,
}

impl MySqlSessionStore {
    pub fn new(pool: MySqlPool, decimal_places: u32) -> Self {
        Self {
            pool,
            decimal_places,
        }
    }
}

#[async_trait]
impl SessionStore for MySqlSessionStore {
    async fn append(&self, session: &CompletedSession) -> Result<u64, StoreError> {
        let start_pct = to_percentage(session.start_progress, self.decimal_places);
        let end_pct = to_percentage(session.end_progress, self.decimal_places);
        let delta_pct = round_to(end_pct - start_pct, self.decimal_places);

        let result = sqlx::query(
            r#"
            INSERT INTO reading_sessions (
                user_id,
                book_id,
                book_type,
                start_time,
                end_time,
                duration_seconds,
                start_progress,
                end_progress,
                progress_delta,
                start_location,
                end_location,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, UTC_TIMESTAMP())
            "#,
        )
        .bind(session.user_id)
        .bind(session.book_id)
        .bind(&session.book_type)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(start_pct)
        .bind(end_pct)
        .bind(delta_pct)
        .bind(&session.start_location)
        .bind(&session.end_location)
        .execute(&self.pool)
        .await?;

        let session_id = result.last_insert_id();

        tracing::debug!(
            session_id,
            user_id = session.user_id,
            book_id = session.book_id,
            duration_seconds = session.duration_seconds,
            progress_delta = delta_pct,
            "Completed session inserted"
        );

        Ok(session_id)
    }
}

/// Convert a 0.0–1.0 fraction into a rounded percentage
pub fn to_percentage(fraction: f64, decimal_places: u32) -> f64 {
    round_to(fraction * 100.0, decimal_places)
}

fn round_to(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}
