use super::schema::Database;
use super::types::{Article, ArticleDbRow, DatabaseError};
use crate::feed::DownloadedArticle;

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Default page size for `get_articles_for_feed`
const DEFAULT_ARTICLE_LIMIT: i64 = 500;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Insert an article, or update title/content/link/published of the
    /// existing row with the same (`feed_id`, `article_id`).
    pub(crate) async fn write_article(
        &self,
        feed_id: i64,
        article: &DownloadedArticle,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
                INSERT INTO articles (feed_id, article_id, title, content, link, published)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(feed_id, article_id) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    link = excluded.link,
                    published = excluded.published
            "#,
        )
        .bind(feed_id)
        .bind(&article.article_id)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.link)
        .bind(article.published.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get articles for a feed, newest first.
    ///
    /// `limit` defaults to 500 and is capped at `MAX_ARTICLES`.
    pub async fn get_articles_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.unwrap_or(DEFAULT_ARTICLE_LIMIT).clamp(1, MAX_ARTICLES);

        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
                SELECT id, feed_id, article_id, title, content, link, published
                FROM articles
                WHERE feed_id = ?
                ORDER BY published DESC, id DESC
                LIMIT ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ArticleDbRow::into_article).collect()
    }

    /// Number of stored articles for a feed.
    pub async fn count_articles_for_feed(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
