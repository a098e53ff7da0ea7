use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::parse_http_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Feed kind assumed when an outline has no `type`
const DEFAULT_KIND: &str = "rss";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription extracted from an OPML file.
///
/// Represents a single `<outline>` element with an `xmlUrl` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// Sourced from `title`, falling back to `text`, then to the XML URL itself.
    pub title: String,
    /// URL of the feed document. Always absolute http(s).
    pub xml_url: String,
    /// URL of the feed's website, if provided via `htmlUrl`.
    pub html_url: Option<String>,
    /// Format hint from the outline's `type` attribute (`rss` if absent).
    pub kind: String,
}

/// Reads an OPML file from disk and extracts its feed subscriptions.
pub async fn read_opml(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extracts every `<outline>` with an `xmlUrl`, at any nesting depth.
///
/// Category outlines (no `xmlUrl`) are traversed but not returned. Outlines
/// whose feed URL is not absolute http(s) are skipped with a warning.
///
/// # Security
///
/// quick-xml (0.37) never parses `<!ENTITY>` declarations, so DOCTYPE
/// entities cannot expand; an undeclared entity reference in an attribute
/// is a parse error.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    // SEC-003: Track nesting depth to prevent stack overflow from malicious OPMLs
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(feed) = outline_feed(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(feed) = outline_feed(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    Ok(feeds)
}

/// Returns `Some(OpmlFeed)` if the outline has a valid `xmlUrl` attribute,
/// `None` for category/folder outlines.
fn outline_feed(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<OpmlFeed>, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut title = None;
    let mut text = None;
    let mut kind = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?
            .trim()
            .to_string();

        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value),
            b"htmlUrl" => match parse_http_url(&value) {
                Some(_) => html_url = Some(value),
                None => tracing::warn!(url = %value, "Ignoring invalid htmlUrl in OPML"),
            },
            b"title" => title = Some(value),
            b"text" => text = Some(value),
            b"type" => kind = Some(value.to_ascii_lowercase()),
            _ => {}
        }
    }

    let Some(url) = xml_url else {
        return Ok(None);
    };
    if parse_http_url(&url).is_none() {
        tracing::warn!(url = %url, "Skipping invalid feed URL in OPML");
        return Ok(None);
    }

    let title = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| url.clone());

    Ok(Some(OpmlFeed {
        title,
        xml_url: url,
        html_url,
        kind: kind
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_KIND.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_outlines() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline type="Atom" text="No HTML" title="No HTML" xmlUrl="https://nohtml.com/atom"/>
    </outline>
  </body>
</opml>"#;

        let feeds = parse_opml(content).expect("Failed to parse OPML content with nested outlines");
        assert_eq!(feeds.len(), 2);

        assert_eq!(feeds[0].title, "Example Blog");
        assert_eq!(feeds[0].xml_url, "https://example.com/feed.xml");
        assert_eq!(feeds[0].html_url, Some("https://example.com".to_string()));
        assert_eq!(feeds[0].kind, "rss");

        assert_eq!(feeds[1].title, "No HTML");
        assert_eq!(feeds[1].html_url, None);
        assert_eq!(feeds[1].kind, "atom");
    }

    #[test]
    fn test_title_fallbacks() {
        let content = r#"<opml version="2.0"><body>
            <outline text="Text Only" xmlUrl="https://textonly.com/feed"/>
            <outline xmlUrl="https://notitle.com/feed"/>
        </body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds[0].title, "Text Only");
        assert_eq!(feeds[0].kind, "rss");
        assert_eq!(feeds[1].title, "https://notitle.com/feed");
    }

    #[test]
    fn test_skip_invalid_scheme_feeds() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body>
        <outline xmlUrl="https://valid.com/feed"/>
        <outline xmlUrl="file:///etc/passwd"/>
        <outline xmlUrl="/relative/feed"/>
    </body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].xml_url, "https://valid.com/feed");
    }

    #[test]
    fn test_escaped_attribute_values() {
        let content = r#"<opml><body>
            <outline title="Tom &amp; Jerry" xmlUrl="https://example.com/feed?a=1&amp;b=2"/>
        </body></opml>"#;

        let feeds = parse_opml(content).unwrap();
        assert_eq!(feeds[0].title, "Tom & Jerry");
        assert_eq!(feeds[0].xml_url, "https://example.com/feed?a=1&b=2");
    }

    #[test]
    fn test_empty_opml() {
        let feeds = parse_opml(r#"<opml version="2.0"><body></body></opml>"#).unwrap();
        assert!(feeds.is_empty());
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(
            parse_opml("<opml><body></opml>"),
            Err(OpmlError::XmlParse(_))
        ));
    }

    #[test]
    fn test_internal_entity_not_expanded() {
        // SEC-002: DOCTYPE entities are never expanded
        let content = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY internal "EXPANDED_VALUE">]>
<opml version="2.0">
    <body>
        <outline text="&internal;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        match parse_opml(content) {
            Ok(feeds) => {
                for feed in &feeds {
                    assert!(!feed.title.contains("EXPANDED_VALUE"));
                }
            }
            Err(e) => assert!(matches!(e, OpmlError::XmlParse(_))),
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        // SEC-003: 100 nested outlines exceeds MAX_OPML_DEPTH of 50
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        opml.push_str(&r#"<outline text="level">"#.repeat(100));
        opml.push_str(&"</outline>".repeat(100));
        opml.push_str("</body></opml>");

        let err = parse_opml(&opml).unwrap_err();
        assert!(matches!(err, OpmlError::MaxDepthExceeded(50)));
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        opml.push_str(&r#"<outline text="level">"#.repeat(50));
        opml.push_str(r#"<outline text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        opml.push_str(&"</outline>".repeat(50));
        opml.push_str("</body></opml>");

        let feeds = parse_opml(&opml).expect("OPML at exactly max depth should be allowed");
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Deep Feed");
    }

    #[tokio::test]
    async fn test_read_opml_from_file() {
        let dir = std::env::temp_dir().join("feedpipe_opml_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("subs.opml");
        std::fs::write(
            &path,
            r#"<opml><body><outline title="File" xmlUrl="https://file.example.com/rss"/></body></opml>"#,
        )
        .unwrap();

        let feeds = read_opml(&path).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "File");

        let missing = read_opml(&dir.join("missing.opml")).await;
        assert!(matches!(missing, Err(OpmlError::Io(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
