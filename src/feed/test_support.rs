//! In-memory `FeedStore` for pipeline and scheduler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::DownloadedArticle;
use crate::storage::{DatabaseError, Feed, FeedStore};

pub(crate) fn feed(id: i64, url: &str) -> Feed {
    Feed {
        id,
        url: url.to_string(),
        title: format!("Feed {id}"),
        kind: "rss".to_string(),
        disabled: false,
        icon: None,
        html_url: None,
    }
}

fn unavailable_error() -> DatabaseError {
    DatabaseError::Other(sqlx::Error::PoolClosed)
}

/// Records every write; reads are served from fixed data.
#[derive(Default)]
pub(crate) struct RecordingStore {
    feeds: Vec<Feed>,
    last_updates: HashMap<i64, DateTime<Utc>>,
    unavailable: bool,
    failing_upserts: bool,
    panicking_feed: Option<i64>,
    active_feed_calls: AtomicUsize,
    articles: Mutex<Vec<(i64, DownloadedArticle)>>,
    icons: Mutex<Vec<(i64, String)>>,
    logs: Mutex<Vec<(i64, bool, Option<String>)>>,
}

impl RecordingStore {
    pub(crate) fn with_feeds(feeds: Vec<Feed>) -> Self {
        Self {
            feeds,
            ..Self::default()
        }
    }

    /// Every read fails
    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_last_update(mut self, feed_id: i64, at: DateTime<Utc>) -> Self {
        self.last_updates.insert(feed_id, at);
        self
    }

    pub(crate) fn failing_upserts(mut self) -> Self {
        self.failing_upserts = true;
        self
    }

    /// `upsert_article` panics for this feed, taking its refresh task down
    pub(crate) fn panicking_on(mut self, feed_id: i64) -> Self {
        self.panicking_feed = Some(feed_id);
        self
    }

    /// Number of refresh cycles that reached the store
    pub(crate) fn cycles(&self) -> usize {
        self.active_feed_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn articles(&self) -> Vec<(i64, DownloadedArticle)> {
        lock(&self.articles).clone()
    }

    pub(crate) fn icons(&self) -> Vec<(i64, String)> {
        lock(&self.icons).clone()
    }

    pub(crate) fn logs(&self) -> Vec<(i64, bool, Option<String>)> {
        lock(&self.logs).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FeedStore for RecordingStore {
    async fn get_active_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        self.active_feed_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(unavailable_error());
        }
        Ok(self.feeds.iter().filter(|f| !f.disabled).cloned().collect())
    }

    async fn get_last_update(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.last_updates.get(&feed_id).copied())
    }

    async fn upsert_article(
        &self,
        feed_id: i64,
        article: &DownloadedArticle,
    ) -> Result<(), DatabaseError> {
        if self.panicking_feed == Some(feed_id) {
            panic!("store exploded for feed {feed_id}");
        }
        if self.failing_upserts {
            return Err(unavailable_error());
        }
        lock(&self.articles).push((feed_id, article.clone()));
        Ok(())
    }

    async fn update_feed_icon(&self, feed_id: i64, icon: &str) -> Result<(), DatabaseError> {
        lock(&self.icons).push((feed_id, icon.to_string()));
        Ok(())
    }

    async fn append_feed_log(
        &self,
        feed_id: i64,
        _time: DateTime<Utc>,
        success: bool,
        message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        lock(&self.logs).push((feed_id, success, message.map(str::to_string)));
        Ok(())
    }
}
