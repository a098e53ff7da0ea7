use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored timestamp could not be represented
    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

pub(crate) fn timestamp_from_db(column: &'static str, value: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp(value, 0).ok_or(DatabaseError::InvalidTimestamp { column, value })
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub article_id: String,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
    pub published: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Result<Article, DatabaseError> {
        Ok(Article {
            id: self.id,
            feed_id: self.feed_id,
            article_id: self.article_id,
            title: self.title,
            content: self.content,
            link: self.link,
            published: timestamp_from_db("published", self.published)?,
        })
    }
}

/// Internal row type for feed log queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedLogDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub time: i64,
    pub success: bool,
    pub message: Option<String>,
}

impl FeedLogDbRow {
    pub(crate) fn into_log(self) -> Result<FeedLog, DatabaseError> {
        Ok(FeedLog {
            id: self.id,
            feed_id: self.feed_id,
            time: timestamp_from_db("time", self.time)?,
            success: self.success,
            message: self.message,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
///
/// `icon` is written by the refresh pipeline; every other field is owned by
/// subscription management and never touched by parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    /// Format family hint ("rss", "atom", "rdf"). Defaults to "rss".
    pub kind: String,
    pub disabled: bool,
    /// Icon URL or `data:` URL
    pub icon: Option<String>,
    pub html_url: Option<String>,
}

/// A persisted article. Unique on (`feed_id`, `article_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    /// Stable external identifier derived from the feed item
    pub article_id: String,
    pub title: String,
    /// Sanitized HTML, possibly empty
    pub content: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
}

/// One refresh attempt for one feed. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedLog {
    pub id: i64,
    pub feed_id: i64,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub message: Option<String>,
}
