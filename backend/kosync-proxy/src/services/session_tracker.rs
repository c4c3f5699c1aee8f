//! Reading session tracking engine
//!
//! Turns a stream of confirmed progress syncs into discrete reading sessions.
//! A session per `(user, book)` stays in memory while syncs keep arriving
//! within the inactivity timeout; it is closed by the periodic sweep, by a
//! sync that arrives after a longer gap, or by shutdown. Closed sessions
//! shorter than the minimum duration are discarded, everything else is
//! appended to the [`SessionStore`].
//!
//! Locking: the session table sits behind one mutex that is only held for
//! in-memory changes. Store writes happen after the lock is released, under a
//! read permit of `flush_gate`; shutdown takes the write side so it waits for
//! every flush that started before the table was closed.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::db::SessionStore;
use crate::error::{ConfigError, StoreError, TrackingError};
use crate::metrics;
use crate::models::{ActiveSession, CompletedSession, SessionKey, SyncEvent};

const DEFAULT_SHUTDOWN_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(250);

/// Session lifecycle rules
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Maximum gap between syncs that still belongs to one session
    pub timeout: Duration,
    pub min_duration_seconds: i64,
    pub require_progress_change: bool,
    /// Pause before the single retry of a failed append during shutdown
    pub shutdown_retry_delay: std::time::Duration,
    pub display_timezone: FixedOffset,
}

impl TrackerSettings {
    pub fn new(timeout: Duration, min_duration_seconds: i64) -> Self {
        Self {
            timeout,
            min_duration_seconds,
            require_progress_change: false,
            shutdown_retry_delay: DEFAULT_SHUTDOWN_RETRY_DELAY,
            display_timezone: Utc.fix(),
        }
    }

    pub fn from_config(
        config: &SessionConfig,
        display_timezone: FixedOffset,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: config.session_timeout()?,
            min_duration_seconds: config.min_duration()?,
            require_progress_change: config.require_progress_change,
            shutdown_retry_delay: DEFAULT_SHUTDOWN_RETRY_DELAY,
            display_timezone,
        })
    }

    pub fn with_require_progress_change(mut self, required: bool) -> Self {
        self.require_progress_change = required;
        self
    }

    pub fn with_shutdown_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.shutdown_retry_delay = delay;
        self
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle sessions closed by this sweep
    pub expired: usize,
    pub persisted: usize,
    pub discarded: usize,
    /// Appends that failed and will be retried on the next sweep
    pub requeued: usize,
    /// Earlier failures retried by this sweep
    pub retried: usize,
    /// Retries that failed again and were given up
    pub dropped: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.retried == 0
    }
}

/// Counts from the shutdown flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Active sessions closed by shutdown
    pub flushed: usize,
    /// Sessions written, including earlier failures drained from the retry queue
    pub persisted: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscardReason {
    TooShort { duration: i64, minimum: i64 },
    NoProgressChange,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::TooShort { duration, minimum } => {
                write!(f, "duration {}s < {}s", duration, minimum)
            }
            DiscardReason::NoProgressChange => f.write_str("no position change"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Sweep,
    Stale,
    Shutdown,
    Retry,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Sweep => "sweep",
            FlushTrigger::Stale => "stale",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Retry => "retry",
        }
    }
}

enum FlushOutcome {
    Persisted,
    Discarded,
    Failed(CompletedSession),
}

#[derive(Default)]
struct SessionTable {
    active: HashMap<SessionKey, ActiveSession>,
    /// Completed sessions whose append failed once
    retry_queue: Vec<CompletedSession>,
    closed: bool,
}

/// Owns every active reading session
pub struct SessionTracker {
    settings: TrackerSettings,
    store: Arc<dyn SessionStore>,
    table: Mutex<SessionTable>,
    flush_gate: RwLock<()>,
}

impl SessionTracker {
    pub fn new(settings: TrackerSettings, store: Arc<dyn SessionStore>) -> Self {
        Self {
            settings,
            store,
            table: Mutex::new(SessionTable::default()),
            flush_gate: RwLock::new(()),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one confirmed sync to the session table.
    ///
    /// Never fails: store errors from closing a stale session are logged and
    /// the session is queued for the next sweep.
    pub async fn record_event(&self, event: SyncEvent) {
        let _permit = self.flush_gate.read().await;
        let key = event.key();

        let stale = {
            let mut table = self.table();
            if table.closed {
                warn!(
                    user_id = key.user_id,
                    book_id = key.book_id,
                    "Tracker is shutting down, dropping sync event"
                );
                return;
            }

            let stale = match table.active.entry(key) {
                Entry::Vacant(slot) => {
                    info!(
                        user_id = key.user_id,
                        book_id = key.book_id,
                        direction = %event.direction,
                        start_progress = event.progress,
                        "New reading session started"
                    );
                    slot.insert(ActiveSession::start(&event));
                    None
                }
                Entry::Occupied(mut slot) => {
                    let gap = event.event_time - slot.get().last_activity_time;
                    if gap > self.settings.timeout {
                        info!(
                            user_id = key.user_id,
                            book_id = key.book_id,
                            gap_seconds = gap.num_seconds(),
                            "Sync arrived after inactivity timeout, starting a new session"
                        );
                        Some(slot.insert(ActiveSession::start(&event)))
                    } else if slot.get_mut().absorb(&event) {
                        debug!(
                            user_id = key.user_id,
                            book_id = key.book_id,
                            direction = %event.direction,
                            progress = event.progress,
                            location = %event.location,
                            "Session updated"
                        );
                        None
                    } else {
                        debug!(
                            user_id = key.user_id,
                            book_id = key.book_id,
                            event_time = %event.event_time,
                            "Ignoring sync older than the session's last activity"
                        );
                        None
                    }
                }
            };

            metrics::set_active_sessions(table.active.len());
            stale
        };

        if let Some(stale) = stale {
            if let FlushOutcome::Failed(completed) =
                self.flush(key, stale, FlushTrigger::Stale).await
            {
                self.requeue(completed);
            }
        }
    }

    /// Close every session idle for longer than the timeout at `now`, and
    /// retry appends that failed during the previous sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let _permit = self.flush_gate.read().await;

        let (expired, retries) = {
            let mut table = self.table();
            if table.closed {
                return SweepReport::default();
            }

            let timeout = self.settings.timeout;
            let expired_keys: Vec<SessionKey> = table
                .active
                .iter()
                .filter(|(_, session)| session.idle_for(now) > timeout)
                .map(|(key, _)| *key)
                .collect();

            let expired: Vec<(SessionKey, ActiveSession)> = expired_keys
                .into_iter()
                .filter_map(|key| table.active.remove(&key).map(|session| (key, session)))
                .collect();

            metrics::set_active_sessions(table.active.len());
            (expired, std::mem::take(&mut table.retry_queue))
        };

        let mut report = SweepReport::default();

        for completed in retries {
            report.retried += 1;
            match self.store.append(&completed).await {
                Ok(session_id) => {
                    report.persisted += 1;
                    self.log_persisted(session_id, &completed, FlushTrigger::Retry);
                }
                Err(e) => {
                    report.dropped += 1;
                    metrics::record_session_flush(FlushTrigger::Retry.as_str(), "dropped");
                    warn!(
                        user_id = completed.user_id,
                        book_id = completed.book_id,
                        duration_seconds = completed.duration_seconds,
                        error = %e,
                        "Dropping completed session after failed retry"
                    );
                }
            }
        }

        for (key, session) in expired {
            report.expired += 1;
            match self.flush(key, session, FlushTrigger::Sweep).await {
                FlushOutcome::Persisted => report.persisted += 1,
                FlushOutcome::Discarded => report.discarded += 1,
                FlushOutcome::Failed(completed) => {
                    report.requeued += 1;
                    self.requeue(completed);
                }
            }
        }

        report
    }

    /// Flush every remaining session and wait for each append.
    ///
    /// After this returns the table is empty and closed; later events are
    /// dropped. A failed append is retried once; sessions that still cannot be
    /// written are returned in [`TrackingError::ShutdownFlushFailed`].
    pub async fn shutdown(&self) -> Result<ShutdownReport, TrackingError> {
        let sessions: Vec<(SessionKey, ActiveSession)> = {
            let mut table = self.table();
            table.closed = true;
            let drained = table.active.drain().collect();
            metrics::set_active_sessions(0);
            drained
        };

        // Flushes that started before the table closed may still requeue
        drop(self.flush_gate.write().await);
        let pending = std::mem::take(&mut self.table().retry_queue);

        if sessions.is_empty() && pending.is_empty() {
            info!("Shutdown: no active sessions to flush");
            return Ok(ShutdownReport::default());
        }

        info!(
            active = sessions.len(),
            pending_retries = pending.len(),
            "Shutdown: flushing active sessions"
        );

        let mut report = ShutdownReport::default();
        let mut to_persist = Vec::with_capacity(sessions.len() + pending.len());

        for (key, session) in sessions {
            report.flushed += 1;
            let completed = session.complete(key);
            match self.discard_reason(&completed) {
                Some(reason) => {
                    report.discarded += 1;
                    metrics::record_session_flush(FlushTrigger::Shutdown.as_str(), "discarded");
                    debug!(
                        user_id = key.user_id,
                        book_id = key.book_id,
                        reason = %reason,
                        "Shutdown: session skipped"
                    );
                }
                None => to_persist.push(completed),
            }
        }
        to_persist.extend(pending);

        let mut failed = Vec::new();
        for completed in to_persist {
            match self.persist_with_retry(&completed).await {
                Ok(session_id) => {
                    report.persisted += 1;
                    self.log_persisted(session_id, &completed, FlushTrigger::Shutdown);
                }
                Err(e) => {
                    metrics::record_session_flush(FlushTrigger::Shutdown.as_str(), "failed");
                    error!(
                        user_id = completed.user_id,
                        book_id = completed.book_id,
                        started_at = %completed.started_at,
                        duration_seconds = completed.duration_seconds,
                        error = %e,
                        "Shutdown: session could not be persisted"
                    );
                    failed.push(completed.key());
                }
            }
        }

        if failed.is_empty() {
            info!(
                flushed = report.flushed,
                persisted = report.persisted,
                discarded = report.discarded,
                "Shutdown flush complete"
            );
            Ok(report)
        } else {
            Err(TrackingError::ShutdownFlushFailed { failed })
        }
    }

    /// Number of sessions currently held in memory
    pub fn active_count(&self) -> usize {
        self.table().active.len()
    }

    /// Copy of the active session for `key`, if any
    pub fn snapshot(&self, key: SessionKey) -> Option<ActiveSession> {
        self.table().active.get(&key).cloned()
    }

    /// Completed sessions waiting for a second append attempt
    pub fn pending_retries(&self) -> usize {
        self.table().retry_queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    async fn flush(
        &self,
        key: SessionKey,
        session: ActiveSession,
        trigger: FlushTrigger,
    ) -> FlushOutcome {
        let completed = session.complete(key);

        if let Some(reason) = self.discard_reason(&completed) {
            metrics::record_session_flush(trigger.as_str(), "discarded");
            debug!(
                user_id = key.user_id,
                book_id = key.book_id,
                trigger = trigger.as_str(),
                reason = %reason,
                "Session not written to store"
            );
            return FlushOutcome::Discarded;
        }

        match self.store.append(&completed).await {
            Ok(session_id) => {
                self.log_persisted(session_id, &completed, trigger);
                FlushOutcome::Persisted
            }
            Err(e) => {
                metrics::record_session_flush(trigger.as_str(), "failed");
                warn!(
                    user_id = key.user_id,
                    book_id = key.book_id,
                    trigger = trigger.as_str(),
                    error = %e,
                    "Failed to persist completed session, will retry on next sweep"
                );
                FlushOutcome::Failed(completed)
            }
        }
    }

    async fn persist_with_retry(&self, completed: &CompletedSession) -> Result<u64, StoreError> {
        match self.store.append(completed).await {
            Ok(session_id) => Ok(session_id),
            Err(first) => {
                warn!(
                    user_id = completed.user_id,
                    book_id = completed.book_id,
                    error = %first,
                    "Shutdown: append failed, retrying once"
                );
                tokio::time::sleep(self.settings.shutdown_retry_delay).await;
                self.store.append(completed).await
            }
        }
    }

    fn requeue(&self, completed: CompletedSession) {
        let mut table = self.table();
        table.retry_queue.push(completed);
    }

    fn discard_reason(&self, completed: &CompletedSession) -> Option<DiscardReason> {
        if completed.duration_seconds < self.settings.min_duration_seconds {
            Some(DiscardReason::TooShort {
                duration: completed.duration_seconds,
                minimum: self.settings.min_duration_seconds,
            })
        } else if self.settings.require_progress_change && completed.progress_delta == 0.0 {
            Some(DiscardReason::NoProgressChange)
        } else {
            None
        }
    }

    fn log_persisted(&self, session_id: u64, completed: &CompletedSession, trigger: FlushTrigger) {
        metrics::record_session_flush(trigger.as_str(), "persisted");
        let tz = self.settings.display_timezone;
        info!(
            session_id,
            user_id = completed.user_id,
            book_id = completed.book_id,
            trigger = trigger.as_str(),
            started_at = %completed.started_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %:z"),
            duration_seconds = completed.duration_seconds,
            start_progress = completed.start_progress,
            end_progress = completed.end_progress,
            "Reading session completed and written to store"
        );
    }
}
