//! In-memory SessionStore with failure injection

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kosync_proxy::db::SessionStore;
use kosync_proxy::error::StoreError;
use kosync_proxy::models::CompletedSession;

#[derive(Clone, Default)]
pub struct MockSessionStore {
    sessions: Arc<Mutex<Vec<CompletedSession>>>,
    /// Number of upcoming appends that fail
    failures_left: Arc<Mutex<usize>>,
    /// Fail every append while set
    always_fail: Arc<Mutex<bool>>,
    /// Time each append takes before it resolves
    delay: Arc<Mutex<std::time::Duration>>,
    attempts: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` appends, then succeed again
    pub fn fail_next(&self, count: usize) {
        *self.failures_left.lock().unwrap() = count;
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.always_fail.lock().unwrap() = fail;
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn sessions(&self) -> Vec<CompletedSession> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn append(&self, session: &CompletedSession) -> Result<u64, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if *self.always_fail.lock().unwrap() {
            return Err(StoreError::Rejected("store offline".to_string()));
        }
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Rejected("transient failure".to_string()));
            }
        }

        self.sessions.lock().unwrap().push(session.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
