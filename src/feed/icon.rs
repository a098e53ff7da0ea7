use base64::{engine::general_purpose::STANDARD, Engine as _};
use scraper::{Html, Selector};
use url::Url;

use super::fetcher::HttpFetcher;
use super::parser::ParsedFeed;
use crate::config::Config;
use crate::util::{origin_of, parse_http_url, resolve_against};

/// Content type assumed for icons served without one
const DEFAULT_ICON_TYPE: &str = "image/x-icon";

/// Where an icon candidate came from, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconSource {
    /// The icon URL advertised by the feed document
    FeedHint,
    /// A `<link rel="...icon...">` on the site's front page
    PageLink,
    /// The conventional `/favicon.ico`
    Favicon,
}

impl IconSource {
    pub const CHAIN: [IconSource; 3] = [
        IconSource::FeedHint,
        IconSource::PageLink,
        IconSource::Favicon,
    ];
}

/// Finds a working icon for a feed and inlines it as a `data:` URL.
///
/// Every step swallows its own failures; "no icon" is a normal outcome.
#[derive(Debug, Clone)]
pub struct IconResolver {
    fetcher: HttpFetcher,
    max_icon_bytes: usize,
    max_page_bytes: usize,
}

impl IconResolver {
    pub fn new(fetcher: HttpFetcher, config: &Config) -> Self {
        Self::with_limits(fetcher, config.max_icon_bytes, config.max_feed_bytes)
    }

    pub fn with_limits(fetcher: HttpFetcher, max_icon_bytes: usize, max_page_bytes: usize) -> Self {
        Self {
            fetcher,
            max_icon_bytes,
            max_page_bytes,
        }
    }

    /// Returns the feed's icon as a `data:{type};base64,...` URL.
    pub async fn resolve(&self, feed: &ParsedFeed) -> Option<String> {
        let (source, url) = self.locate(feed).await?;
        tracing::debug!(source = ?source, icon = %url, "Icon located");
        self.download(&url).await
    }

    /// Walks [`IconSource::CHAIN`] and returns the first accepted candidate.
    pub async fn locate(&self, feed: &ParsedFeed) -> Option<(IconSource, Url)> {
        for source in IconSource::CHAIN {
            if let Some(url) = self.try_source(source, feed).await {
                return Some((source, url));
            }
        }
        None
    }

    async fn try_source(&self, source: IconSource, feed: &ParsedFeed) -> Option<Url> {
        match source {
            IconSource::FeedHint => {
                let url = parse_http_url(feed.icon.as_deref()?)?;
                self.head_ok(&url, false).await.then_some(url)
            }
            IconSource::PageLink => self.from_page_link(feed).await,
            IconSource::Favicon => {
                let origin = origin_of(&parse_http_url(feed.link.as_deref()?)?)?;
                let url = origin.join("favicon.ico").ok()?;
                self.head_ok(&url, true).await.then_some(url)
            }
        }
    }

    /// Fetches the site's front page, takes the first icon `<link>`, and
    /// probes it over https, then http.
    async fn from_page_link(&self, feed: &ParsedFeed) -> Option<Url> {
        let origin = origin_of(&parse_http_url(feed.link.as_deref()?)?)?;

        let page = match self.fetcher.fetch_body(origin.as_str(), self.max_page_bytes).await {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                tracing::debug!(page = %origin, status = page.status, "Icon page fetch returned non-success status");
                return None;
            }
            Err(e) => {
                tracing::debug!(page = %origin, error = %e, "Icon page fetch failed");
                return None;
            }
        };

        let html = String::from_utf8_lossy(&page.bytes);
        let href = find_icon_href(&html)?;
        let mut candidate = resolve_against(&origin, &href)?;

        for scheme in ["https", "http"] {
            if candidate.set_scheme(scheme).is_err() {
                continue;
            }
            if self.head_ok(&candidate, false).await {
                return Some(candidate);
            }
        }
        None
    }

    /// HEAD probe; accepts only status 200, and with `reject_empty` also
    /// rejects an explicit `Content-Length: 0`.
    async fn head_ok(&self, url: &Url, reject_empty: bool) -> bool {
        match self.fetcher.probe(url.as_str()).await {
            Ok(probe) => {
                probe.status == 200 && !(reject_empty && probe.content_length.as_deref() == Some("0"))
            }
            Err(e) => {
                tracing::debug!(icon = %url, error = %e, "Icon probe failed");
                false
            }
        }
    }

    async fn download(&self, url: &Url) -> Option<String> {
        match self.fetcher.fetch_body(url.as_str(), self.max_icon_bytes).await {
            Ok(body) if body.is_success() && !body.bytes.is_empty() => {
                Some(data_url(body.content_type.as_deref(), &body.bytes))
            }
            Ok(body) => {
                tracing::debug!(icon = %url, status = body.status, "Icon download returned no usable body");
                None
            }
            Err(e) => {
                tracing::debug!(icon = %url, error = %e, "Icon download failed");
                None
            }
        }
    }
}

/// First `<link>` whose `rel` mentions "icon", e.g. `icon`, `shortcut icon`,
/// `apple-touch-icon`.
fn find_icon_href(html: &str) -> Option<String> {
    let selector = Selector::parse("link[rel][href]").ok()?;
    let document = Html::parse_document(html);
    document.select(&selector).find_map(|link| {
        let rel = link.value().attr("rel")?;
        if !rel.to_ascii_lowercase().contains("icon") {
            return None;
        }
        let href = link.value().attr("href")?.trim();
        (!href.is_empty()).then(|| href.to_string())
    })
}

fn data_url(content_type: Option<&str>, bytes: &[u8]) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_ICON_TYPE);
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedFormat;
    use crate::shutdown::Shutdown;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ICON_BYTES: &[u8] = &[0x89, b'P', b'N', b'G'];

    fn resolver() -> IconResolver {
        let fetcher = HttpFetcher::with_client(
            reqwest::Client::new(),
            Duration::from_secs(2),
            Shutdown::never(),
        );
        IconResolver::with_limits(fetcher, 64 * 1024, 256 * 1024)
    }

    fn feed(link: Option<String>, icon: Option<String>) -> ParsedFeed {
        ParsedFeed {
            format: FeedFormat::Rss,
            title: "Test".to_string(),
            link,
            icon,
            items: Vec::new(),
        }
    }

    async fn mount_icon(server: &MockServer, icon_path: &str, mime: &str) {
        Mock::given(method("HEAD"))
            .and(path(icon_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ICON_BYTES.to_vec(), mime))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(icon_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ICON_BYTES.to_vec(), mime))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_feed_hint_accepted_first() {
        let server = MockServer::start().await;
        mount_icon(&server, "/hint.png", "image/png").await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let feed = feed(
            Some(format!("{}/blog", server.uri())),
            Some(format!("{}/hint.png", server.uri())),
        );
        let resolver = resolver();

        let (source, _) = resolver.locate(&feed).await.unwrap();
        assert_eq!(source, IconSource::FeedHint);
        assert_eq!(
            resolver.resolve(&feed).await.as_deref(),
            Some("data:image/png;base64,iVBORw==")
        );
    }

    #[tokio::test]
    async fn test_page_link_used_when_hint_fails() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/hint.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><head><link rel="stylesheet" href="/s.css"><link rel="Shortcut Icon" href="/static/fav.png"></head></html>"#,
                "text/html",
            ))
            .mount(&server)
            .await;
        mount_icon(&server, "/static/fav.png", "image/png").await;
        Mock::given(method("HEAD"))
            .and(path("/favicon.ico"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let feed = feed(
            Some(format!("{}/blog/", server.uri())),
            Some(format!("{}/hint.png", server.uri())),
        );

        let (source, url) = resolver().locate(&feed).await.unwrap();
        assert_eq!(source, IconSource::PageLink);
        // The https attempt fails against a plain-http server, http succeeds
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.path(), "/static/fav.png");
    }

    #[tokio::test]
    async fn test_favicon_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&server)
            .await;
        mount_icon(&server, "/favicon.ico", "image/vnd.microsoft.icon").await;

        let feed = feed(Some(format!("{}/feed.xml", server.uri())), None);

        let resolver = resolver();
        let (source, _) = resolver.locate(&feed).await.unwrap();
        assert_eq!(source, IconSource::Favicon);
        assert_eq!(
            resolver.resolve(&feed).await.as_deref(),
            Some("data:image/vnd.microsoft.icon;base64,iVBORw==")
        );
    }

    #[tokio::test]
    async fn test_zero_length_favicon_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/favicon.ico"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
            .mount(&server)
            .await;

        let feed = feed(Some(server.uri()), None);
        assert_eq!(resolver().resolve(&feed).await, None);
    }

    #[tokio::test]
    async fn test_all_steps_fail_returns_none() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let feed = feed(
            Some(format!("{}/blog", server.uri())),
            Some(format!("{}/icon.png", server.uri())),
        );
        assert_eq!(resolver().resolve(&feed).await, None);
    }

    #[tokio::test]
    async fn test_no_link_and_no_hint() {
        let feed = feed(None, Some("/relative/icon.png".to_string()));
        assert_eq!(resolver().locate(&feed).await, None);
    }

    #[test]
    fn test_find_icon_href() {
        let html = r#"<link rel="alternate" href="/feed"><link rel="apple-touch-icon" href="/touch.png?a=1&amp;b=2">"#;
        assert_eq!(find_icon_href(html).as_deref(), Some("/touch.png?a=1&b=2"));
        assert_eq!(find_icon_href("<link rel=icon href=''>"), None);
        assert_eq!(find_icon_href("<p>nothing</p>"), None);
    }

    #[test]
    fn test_find_icon_href_in_messy_page() {
        let page = r#"<!DOCTYPE html><html><head>
            <LINK REL="Icon" HREF=" /upper.ico ">
            <linkage rel="icon" href="/wrong.ico">
            <link rel="icon" href="/second.ico"></head><body><p>unclosed"#;
        assert_eq!(find_icon_href(page).as_deref(), Some("/upper.ico"));
        assert_eq!(
            find_icon_href("<!-- <link rel=icon href=/commented.ico> --><link rel=icon href=/real.ico>").as_deref(),
            Some("/real.ico")
        );
    }

    #[test]
    fn test_data_url_content_type() {
        assert_eq!(data_url(Some("image/png"), b"abc"), "data:image/png;base64,YWJj");
        assert_eq!(
            data_url(Some("image/png; charset=binary"), b"abc"),
            "data:image/png;base64,YWJj"
        );
        assert_eq!(data_url(None, b"abc"), "data:image/x-icon;base64,YWJj");
        assert_eq!(data_url(Some("  "), b"abc"), "data:image/x-icon;base64,YWJj");
    }
}
