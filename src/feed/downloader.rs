use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use super::fetcher::{FetchError, HttpFetcher};
use super::icon::IconResolver;
use super::identify::identify;
use super::parser::{parse_bytes, FeedFormat, ParseError, ParsedFeed, ParsedItem};
use super::sanitize::sanitize;
use crate::config::Config;
use crate::storage::{DatabaseError, Feed, FeedStore};
use crate::util::{parse_http_url, resolve_against};

const UNTITLED_ARTICLE: &str = "Untitled";
const UNTITLED_FEED: &str = "Untitled Feed";

// ============================================================================
// Error Types
// ============================================================================

/// A single feed download failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The server answered, but not with a 2xx
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Why refreshing one feed failed. Recorded in the feed log, never propagated.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to store feed data: {0}")]
    Store(#[from] DatabaseError),

    /// The feed's task panicked or was aborted
    #[error("Refresh task failed: {0}")]
    Task(String),
}

// ============================================================================
// Pipeline Output
// ============================================================================

/// A normalized article, ready to upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedArticle {
    pub article_id: String,
    pub title: String,
    /// Sanitized HTML; empty when the item had no body
    pub content: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFeed {
    pub title: String,
    pub link: String,
    /// `data:` URL
    pub icon: Option<String>,
    pub format: FeedFormat,
    pub articles: Vec<DownloadedArticle>,
}

/// Outcome of refreshing one feed.
#[derive(Debug)]
pub struct FeedOutcome {
    pub feed_id: i64,
    /// Number of articles upserted
    pub result: Result<usize, RefreshError>,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Active feeds left alone because they were refreshed recently
    pub skipped: usize,
    pub outcomes: Vec<FeedOutcome>,
}

impl RefreshSummary {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// Total articles upserted across successful feeds.
    pub fn articles(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }
}

// ============================================================================
// Downloader
// ============================================================================

/// Downloads, parses and normalizes feeds, and drives refresh cycles.
#[derive(Debug, Clone)]
pub struct FeedDownloader {
    fetcher: HttpFetcher,
    icons: IconResolver,
    max_feed_bytes: usize,
}

impl FeedDownloader {
    pub fn new(fetcher: HttpFetcher, config: &Config) -> Self {
        let icons = IconResolver::new(fetcher.clone(), config);
        Self::with_parts(fetcher, icons, config.max_feed_bytes)
    }

    pub fn with_parts(fetcher: HttpFetcher, icons: IconResolver, max_feed_bytes: usize) -> Self {
        Self {
            fetcher,
            icons,
            max_feed_bytes,
        }
    }

    /// Fetches and normalizes one feed without touching any store.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Fetch`] for network failures, timeouts and oversized bodies
    /// - [`DownloadError::HttpStatus`] for a non-2xx response
    /// - [`DownloadError::Parse`] if the body is empty or not a feed
    ///
    /// Icon resolution never fails the download.
    pub async fn download_feed(&self, url: &str) -> Result<DownloadedFeed, DownloadError> {
        let body = self.fetcher.fetch_body(url, self.max_feed_bytes).await?;
        if !body.is_success() {
            return Err(DownloadError::HttpStatus(body.status));
        }

        let mut parsed = parse_bytes(&body.bytes, body.content_type.as_deref())?;
        tracing::debug!(feed = %url, format = ?parsed.format, items = parsed.items.len(), "Parsed feed");

        // The icon chain only follows absolute URLs
        absolutize_feed_urls(url, &mut parsed);
        let icon = self.icons.resolve(&parsed).await;
        Ok(normalize(url, parsed, icon, Utc::now()))
    }

    /// Refreshes every active feed not attempted within `min_delay`.
    ///
    /// Each feed runs in its own task and all tasks are awaited to
    /// completion, so one feed failing (or panicking) never affects another.
    /// Exactly one log row is appended per attempted feed.
    pub async fn refresh_feeds<S>(&self, store: Arc<S>, min_delay: Duration) -> RefreshSummary
    where
        S: FeedStore + 'static,
    {
        let feeds = match store.get_active_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load active feeds, skipping refresh cycle");
                return RefreshSummary::default();
            }
        };

        let now = Utc::now();
        let mut due = Vec::with_capacity(feeds.len());
        let mut skipped = 0;

        for feed in feeds {
            match store.get_last_update(feed.id).await {
                Ok(Some(last)) if updated_within(last, now, min_delay) => {
                    tracing::debug!(feed = %feed.url, last_update = %last, "Refreshed recently, skipping");
                    skipped += 1;
                }
                Ok(_) => due.push(feed),
                Err(e) => {
                    tracing::warn!(feed = %feed.url, error = %e, "Failed to read last update, refreshing anyway");
                    due.push(feed);
                }
            }
        }

        tracing::info!(due = due.len(), skipped = skipped, "Starting refresh cycle");

        let (feed_ids, tasks): (Vec<i64>, Vec<_>) = due
            .into_iter()
            .map(|feed| {
                let downloader = self.clone();
                let store = Arc::clone(&store);
                let feed_id = feed.id;
                let task = tokio::spawn(async move { downloader.refresh_one(store.as_ref(), &feed).await });
                (feed_id, task)
            })
            .unzip();

        let mut outcomes = Vec::with_capacity(feed_ids.len());
        for (feed_id, joined) in feed_ids.into_iter().zip(join_all(tasks).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let error = RefreshError::Task(e.to_string());
                    tracing::error!(feed_id = feed_id, error = %error, "Feed refresh task did not complete");
                    record_attempt(store.as_ref(), feed_id, Some(&error.to_string())).await;
                    Err(error)
                }
            };
            outcomes.push(FeedOutcome { feed_id, result });
        }

        let summary = RefreshSummary { skipped, outcomes };
        tracing::info!(
            attempted = summary.attempted(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            articles = summary.articles(),
            "Refresh cycle finished"
        );
        summary
    }

    /// Downloads and persists one feed, then logs the attempt.
    async fn refresh_one<S: FeedStore>(&self, store: &S, feed: &Feed) -> Result<usize, RefreshError> {
        let result = self.download_and_store(store, feed).await;

        match &result {
            Ok(count) => {
                tracing::info!(feed = %feed.url, articles = count, "Feed refreshed");
                record_attempt(store, feed.id, None).await;
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                record_attempt(store, feed.id, Some(&e.to_string())).await;
            }
        }

        result
    }

    async fn download_and_store<S: FeedStore>(&self, store: &S, feed: &Feed) -> Result<usize, RefreshError> {
        let downloaded = self.download_feed(&feed.url).await?;

        if let Some(icon) = &downloaded.icon {
            if feed.icon.as_deref() != Some(icon.as_str()) {
                store.update_feed_icon(feed.id, icon).await?;
            }
        }

        for article in &downloaded.articles {
            store.upsert_article(feed.id, article).await?;
        }

        Ok(downloaded.articles.len())
    }
}

/// Appends the log row for one attempt; `failure` is `None` on success.
async fn record_attempt<S: FeedStore>(store: &S, feed_id: i64, failure: Option<&str>) {
    if let Err(e) = store
        .append_feed_log(feed_id, Utc::now(), failure.is_none(), failure)
        .await
    {
        tracing::warn!(feed_id = feed_id, error = %e, "Failed to append feed log");
    }
}

fn updated_within(last: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match TimeDelta::from_std(window) {
        Ok(window) => now.signed_duration_since(last) < window,
        // Window too large to represent: everything counts as recent
        Err(_) => true,
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Resolves a relative channel link and icon hint against the download URL.
fn absolutize_feed_urls(feed_url: &str, parsed: &mut ParsedFeed) {
    let Some(source) = parse_http_url(feed_url) else {
        return;
    };
    for field in [&mut parsed.link, &mut parsed.icon] {
        if let Some(resolved) = field.as_deref().and_then(|value| resolve_against(&source, value)) {
            *field = Some(resolved.into());
        }
    }
}

/// Turns a parsed document into pipeline output.
///
/// Relative links resolve against the feed's own link, which itself falls
/// back to the URL it was downloaded from.
fn normalize(
    feed_url: &str,
    parsed: ParsedFeed,
    icon: Option<String>,
    now: DateTime<Utc>,
) -> DownloadedFeed {
    let source = parse_http_url(feed_url);
    let link = parsed
        .link
        .as_deref()
        .and_then(|link| match &source {
            Some(source) => resolve_against(source, link).map(String::from),
            None => Some(link.trim().to_string()),
        })
        .unwrap_or_else(|| feed_url.to_string());
    let base = parse_http_url(&link).or(source);

    let articles = parsed
        .items
        .into_iter()
        .map(|item| normalize_item(item, base.as_ref(), &link, now))
        .collect();

    let title = if parsed.title.is_empty() {
        UNTITLED_FEED.to_string()
    } else {
        parsed.title
    };

    DownloadedFeed {
        title,
        link,
        icon,
        format: parsed.format,
        articles,
    }
}

fn normalize_item(
    item: ParsedItem,
    base: Option<&url::Url>,
    feed_link: &str,
    now: DateTime<Utc>,
) -> DownloadedArticle {
    // Identity comes from the item as published, before any rewriting
    let article_id = identify(&item);

    let link = item.link.as_deref().and_then(|link| match base {
        Some(base) => resolve_against(base, link).map(String::from),
        None => Some(link.trim().to_string()),
    });

    let content = match item.content.or(item.summary) {
        Some(html) => sanitize(&html, link.as_deref().unwrap_or(feed_link)),
        None => String::new(),
    };

    DownloadedArticle {
        article_id,
        title: item.title.unwrap_or_else(|| UNTITLED_ARTICLE.to_string()),
        content,
        link,
        published: item.published.unwrap_or(now),
    }
}
