use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{timestamp_from_db, DatabaseError, FeedLog, FeedLogDbRow};

/// Hard cap on log rows returned by a single query
const MAX_LOG_ROWS: i64 = 1000;

impl Database {
    // ========================================================================
    // Feed Log
    // ========================================================================

    pub(crate) async fn insert_feed_log(
        &self,
        feed_id: i64,
        time: DateTime<Utc>,
        success: bool,
        message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO feed_logs (feed_id, time, success, message) VALUES (?, ?, ?, ?)")
            .bind(feed_id)
            .bind(time.timestamp())
            .bind(success)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Time of the most recent refresh attempt for a feed, successful or not.
    pub(crate) async fn latest_feed_log_time(
        &self,
        feed_id: i64,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let (latest,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(time) FROM feed_logs WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        latest.map(|t| timestamp_from_db("time", t)).transpose()
    }

    /// Refresh history for a feed, most recent first.
    pub async fn get_feed_logs(&self, feed_id: i64, limit: i64) -> Result<Vec<FeedLog>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedLogDbRow>(
            r#"
                SELECT id, feed_id, time, success, message
                FROM feed_logs
                WHERE feed_id = ?
                ORDER BY time DESC, id DESC
                LIMIT ?
            "#,
        )
        .bind(feed_id)
        .bind(limit.clamp(1, MAX_LOG_ROWS))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FeedLogDbRow::into_log).collect()
    }
}
