//! KoSync progress proxy with reading-session analytics
//!
//! Sits between KOReader devices and a KoSync server. Every request is relayed
//! unchanged; accepted progress pushes and pulls are also folded into reading
//! sessions, which are written to the `reading_sessions` table once they go
//! idle.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AdapterError, ProxyError, StoreError, TrackingError};
pub use models::{CompletedSession, SessionKey, SyncDirection, SyncEvent};
