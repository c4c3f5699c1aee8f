//! In-memory LibraryDirectory

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use kosync_proxy::db::{BookRef, LibraryDirectory};

#[derive(Default)]
pub struct MockLibrary {
    users: HashMap<String, i64>,
    books: HashMap<String, BookRef>,
    /// Make every lookup fail as if the database were gone
    broken: AtomicBool,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, user_id: i64) -> Self {
        self.users.insert(username.to_string(), user_id);
        self
    }

    pub fn with_book(mut self, document: &str, book_id: i64, book_type: &str) -> Self {
        self.books.insert(
            document.to_string(),
            BookRef {
                book_id,
                book_type: book_type.to_string(),
            },
        );
        self
    }

    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LibraryDirectory for MockLibrary {
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, sqlx::Error> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.users.get(username).copied())
    }

    async fn find_book(&self, document_hash: &str) -> Result<Option<BookRef>, sqlx::Error> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.books.get(document_hash).cloned())
    }
}
