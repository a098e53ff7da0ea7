use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed};
use crate::feed::OpmlFeed;

/// Columns selected for every `Feed` query, in `FromRow` order
const FEED_COLUMNS: &str = "id, url, title, kind, disabled, icon, html_url";

/// A feed subscription to create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub kind: String,
    pub html_url: Option<String>,
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed, returning its id.
    ///
    /// Subscribing to a URL that already exists updates its title and kind
    /// and leaves `disabled` and `icon` alone.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO feeds (url, title, kind, html_url)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    kind = excluded.kind,
                    html_url = COALESCE(excluded.html_url, feeds.html_url)
                RETURNING id
            "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.kind)
        .bind(&feed.html_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Import feeds from an OPML outline.
    ///
    /// Batches inserts in chunks of 100 within a single transaction. Returns
    /// the number of rows written.
    pub async fn import_feeds(&self, feeds: &[OpmlFeed]) -> Result<usize, DatabaseError> {
        if feeds.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO feeds (title, url, kind, html_url) ");

            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(&feed.title)
                    .push_bind(&feed.xml_url)
                    .push_bind(&feed.kind)
                    .push_bind(&feed.html_url);
            });

            builder.push(
                " ON CONFLICT(url) DO UPDATE SET title = excluded.title, kind = excluded.kind, html_url = excluded.html_url",
            );

            written += builder.build().execute(&mut *tx).await?.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// All subscribed feeds, enabled or not, ordered by title.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY title COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Enable or disable a feed. Returns false if no such feed exists.
    pub async fn set_feed_disabled(&self, feed_id: i64, disabled: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET disabled = ? WHERE id = ?")
            .bind(disabled)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn select_active_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE disabled = 0 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub(crate) async fn write_feed_icon(&self, feed_id: i64, icon: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET icon = ? WHERE id = ?")
            .bind(icon)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
