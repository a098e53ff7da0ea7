//! Feed acquisition and normalization.
//!
//! - **Fetching**: bounded, cancellable HTTP requests ([`HttpFetcher`])
//! - **Parsing**: Atom, RDF and RSS 2.0 into one structural model ([`parse`])
//! - **Normalization**: stable item ids, title cleanup, content rewriting
//! - **Icons**: feed hint, page `<link>`, then `/favicon.ico` ([`IconResolver`])
//! - **Refresh**: per-feed isolated download-and-store cycles ([`FeedDownloader`])
//! - **Scheduling**: periodic, non-overlapping cycles ([`Scheduler`])
//! - **OPML Import**: subscription lists for bulk feed import
//!
//! # Example
//!
//! ```ignore
//! use feedpipe::feed::{FeedDownloader, HttpFetcher};
//!
//! let fetcher = HttpFetcher::new(&config, shutdown)?;
//! let downloader = FeedDownloader::new(fetcher, &config);
//! let feed = downloader.download_feed("https://example.com/feed.xml").await?;
//! ```

mod downloader;
mod fetcher;
mod icon;
mod identify;
mod opml;
mod parser;
mod sanitize;
mod scheduler;

#[cfg(test)]
mod test_support;

pub use downloader::{
    DownloadError, DownloadedArticle, DownloadedFeed, FeedDownloader, FeedOutcome, RefreshError,
    RefreshSummary,
};
pub use fetcher::{FetchError, FetchOptions, FetchedBody, HttpFetcher, Probe};
pub use icon::{IconResolver, IconSource};
pub use identify::identify;
pub use opml::{parse_opml, read_opml, OpmlError, OpmlFeed};
pub use parser::{parse, parse_bytes, FeedFormat, ParseError, ParsedFeed, ParsedItem};
pub use sanitize::sanitize;
pub use scheduler::{Scheduler, SchedulerError};
