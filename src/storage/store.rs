use std::future::Future;

use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed};
use crate::feed::DownloadedArticle;

/// Persistence consumed by the refresh pipeline.
///
/// Implementations are shared across concurrently running feed tasks, so
/// every method takes `&self` and the returned futures must be `Send`.
/// Upserts for different feeds never touch the same row, so implementations
/// need no locking beyond their own conflict handling.
pub trait FeedStore: Send + Sync {
    /// Feeds eligible for refresh (not disabled).
    fn get_active_feeds(&self) -> impl Future<Output = Result<Vec<Feed>, DatabaseError>> + Send;

    /// Time of the last refresh attempt for a feed, if any.
    fn get_last_update(
        &self,
        feed_id: i64,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, DatabaseError>> + Send;

    /// Insert the article, or update title/content/link/published when
    /// (`feed_id`, `article_id`) already exists.
    fn upsert_article(
        &self,
        feed_id: i64,
        article: &DownloadedArticle,
    ) -> impl Future<Output = Result<(), DatabaseError>> + Send;

    fn update_feed_icon(
        &self,
        feed_id: i64,
        icon: &str,
    ) -> impl Future<Output = Result<(), DatabaseError>> + Send;

    /// Append one refresh-log row. Rows are never updated or deleted.
    fn append_feed_log(
        &self,
        feed_id: i64,
        time: DateTime<Utc>,
        success: bool,
        message: Option<&str>,
    ) -> impl Future<Output = Result<(), DatabaseError>> + Send;
}

impl FeedStore for Database {
    async fn get_active_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        self.select_active_feeds().await
    }

    async fn get_last_update(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        self.latest_feed_log_time(feed_id).await
    }

    async fn upsert_article(
        &self,
        feed_id: i64,
        article: &DownloadedArticle,
    ) -> Result<(), DatabaseError> {
        self.write_article(feed_id, article).await
    }

    async fn update_feed_icon(&self, feed_id: i64, icon: &str) -> Result<(), DatabaseError> {
        self.write_feed_icon(feed_id, icon).await
    }

    async fn append_feed_log(
        &self,
        feed_id: i64,
        time: DateTime<Utc>,
        success: bool,
        message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.insert_feed_log(feed_id, time, success, message).await
    }
}
