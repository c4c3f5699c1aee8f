//! Read-only lookups against the Booklore library tables

use async_trait::async_trait;
use sqlx::{FromRow, MySqlPool};

/// A book file the upstream knows by its document hash
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BookRef {
    pub book_id: i64,
    pub book_type: String,
}

/// Resolves KoSync identifiers to library ids
#[async_trait]
pub trait LibraryDirectory: Send + Sync {
    /// Numeric id of a KoSync user
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, sqlx::Error>;

    /// Book for a document hash; only live (non-deleted) book files match
    async fn find_book(&self, document_hash: &str) -> Result<Option<BookRef>, sqlx::Error>;
}

pub struct MySqlLibraryDirectory {
    pool: MySqlPool,
}

impl MySqlLibraryDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryDirectory for MySqlLibraryDirectory {
    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT CAST(id AS SIGNED) FROM koreader_user WHERE username = ? LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_book(&self, document_hash: &str) -> Result<Option<BookRef>, sqlx::Error> {
        sqlx::query_as::<_, BookRef>(
            r#"
            SELECT CAST(bf.book_id AS SIGNED) AS book_id,
                   CAST(bf.book_type AS CHAR) AS book_type
            FROM book_file bf
            JOIN book b ON bf.book_id = b.id
            WHERE bf.current_hash = ?
              AND bf.is_book = 1
              AND b.deleted = 0
            LIMIT 1
            "#,
        )
        .bind(document_hash)
        .fetch_optional(&self.pool)
        .await
    }
}
