//! Feed document parsing.
//!
//! The XML is read into a small element tree with quick-xml, then the root
//! is classified as Atom, RDF (RSS 1.0) or RSS 2.0 and fields are pulled out
//! per format. Parsing is deliberately forgiving about content (unknown
//! entities, missing fields, odd dates) and strict only about structure.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;

use crate::util::{clean_title, decode_entities};

/// Maximum element nesting depth accepted in a feed document.
/// Real feeds rarely exceed 10; anything deeper is treated as hostile.
const MAX_DEPTH: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// The document could not be turned into a feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty body")]
    Empty,

    #[error("unrecognized feed format (root element <{0}>)")]
    UnrecognizedFormat(String),

    #[error("malformed XML: {0}")]
    Malformed(String),
}

/// Format family of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Atom,
    Rdf,
    Rss,
}

impl FeedFormat {
    /// The value stored in `feeds.kind` for this format.
    pub fn kind(self) -> &'static str {
        match self {
            FeedFormat::Atom => "atom",
            FeedFormat::Rdf => "rdf",
            FeedFormat::Rss => "rss",
        }
    }
}

/// One entry/item as found in the document, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    /// Atom `id`, RSS `guid` or RDF `rdf:about`
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    /// Entity-decoded title; empty if the document has none
    pub title: String,
    pub link: Option<String>,
    /// Icon URL advertised by the document itself
    pub icon: Option<String>,
    pub items: Vec<ParsedItem>,
}

// ============================================================================
// Element Tree
// ============================================================================

#[derive(Debug, Default)]
struct Element {
    /// Qualified name as written, e.g. `dc:date`
    name: String,
    attrs: Vec<(String, String)>,
    /// Concatenated, entity-decoded character data (CDATA kept verbatim)
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn is_named(&self, prefix: &str, local: &str) -> bool {
        self.name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest == local)
    }

    fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    fn child_ns(&self, prefix: &str, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is_named(prefix, local))
    }

    fn children_ns<'s>(
        &'s self,
        prefix: &'s str,
        local: &'s str,
    ) -> impl Iterator<Item = &'s Element> + 's {
        self.children.iter().filter(move |c| c.is_named(prefix, local))
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.child_ns("", name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content, `None` if blank
    fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    fn child_text_ns(&self, prefix: &str, local: &str) -> Option<String> {
        self.child_ns(prefix, local)
            .and_then(Element::text)
            .map(str::to_string)
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child_text_ns("", name)
    }
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();

    for attr_result in start.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(element = %name, error = %e, "Skipping malformed feed attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        attrs.push((key, decode_entities(&raw).into_owned()));
    }

    Element {
        name,
        attrs,
        ..Element::default()
    }
}

/// Atom `content`/`summary` with `type="xhtml"` carry markup as child
/// elements; those are captured as raw text instead of being parsed.
fn is_inline_xhtml(element: &Element) -> bool {
    matches!(element.local_name(), "content" | "summary") && element.attr("type") == Some("xhtml")
}

/// Reads the document into an element tree, returning the root element.
fn read_tree(xml: &str) -> Result<Element, ParseError> {
    // Entity declarations in a DOCTYPE are never expanded by quick-xml; text
    // is decoded by `decode_entities`, which only knows the fixed XML and
    // HTML entity tables.
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Malformed(format!("{} at byte {}", e, reader.error_position())))?;

        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::Malformed(format!(
                        "nesting depth exceeds maximum of {} levels",
                        MAX_DEPTH
                    )));
                }
                let mut element = element_from(&start);

                if is_inline_xhtml(&element) {
                    let inner = reader
                        .read_text(start.name())
                        .map_err(|e| ParseError::Malformed(e.to_string()))?;
                    element.text = inner.trim().to_string();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                } else {
                    stack.push(element);
                }
            }
            Event::Empty(start) => {
                let element = element_from(&start);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                // End-tag names are checked against the open element by the reader
                let Some(element) = stack.pop() else {
                    return Err(ParseError::Malformed("unexpected closing tag".to_string()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(&text);
                    current.text.push_str(&decode_entities(&raw));
                }
            }
            Event::CData(cdata) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => {
                return match stack.first() {
                    Some(open) => Err(ParseError::Malformed(format!(
                        "document ended inside <{}>",
                        open.name
                    ))),
                    None => Err(ParseError::Empty),
                };
            }
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }
}

// ============================================================================
// Format Detection
// ============================================================================

/// A classified document root.
enum FeedDocument<'a> {
    /// Root `feed` element; `prefix` is its namespace prefix including the
    /// colon (usually empty)
    Atom { feed: &'a Element, prefix: &'a str },
    /// Root `rdf:RDF` element
    Rdf(&'a Element),
    /// The `channel` element, either under `rss` or as the root
    Rss(&'a Element),
}

impl<'a> FeedDocument<'a> {
    /// Classifies the root. Atom, then RDF, then RSS 2.0; first match wins.
    fn detect(root: &'a Element) -> Option<Self> {
        if root.local_name() == "feed" {
            let prefix = &root.name[..root.name.len() - "feed".len()];
            return Some(FeedDocument::Atom { feed: root, prefix });
        }
        if root.name == "rdf:RDF" {
            return Some(FeedDocument::Rdf(root));
        }
        if root.name == "rss" {
            return root.child("channel").map(FeedDocument::Rss);
        }
        if root.name == "channel" {
            return Some(FeedDocument::Rss(root));
        }
        None
    }

    fn extract(&self) -> ParsedFeed {
        match *self {
            FeedDocument::Atom { feed, prefix } => ParsedFeed {
                format: FeedFormat::Atom,
                title: feed_title(feed.child_text_ns(prefix, "title")),
                link: atom_link(feed, prefix),
                icon: feed.child_text_ns(prefix, "icon"),
                items: feed
                    .children_ns(prefix, "entry")
                    .map(|entry| atom_item(entry, prefix))
                    .collect(),
            },
            FeedDocument::Rdf(root) => {
                let channel = root.child("channel");
                // RSS 1.0 puts items beside the channel; some generators nest them
                let items = root
                    .children_ns("", "item")
                    .chain(channel.into_iter().flat_map(|c| c.children_ns("", "item")))
                    .map(rdf_item)
                    .collect();
                let icon = root
                    .child("image")
                    .or_else(|| channel.and_then(|c| c.child("image")))
                    .and_then(|image| image.child_text("url"));

                ParsedFeed {
                    format: FeedFormat::Rdf,
                    title: feed_title(channel.and_then(|c| c.child_text("title"))),
                    link: channel.and_then(|c| c.child_text("link")),
                    icon,
                    items,
                }
            }
            FeedDocument::Rss(channel) => ParsedFeed {
                format: FeedFormat::Rss,
                title: feed_title(channel.child_text("title")),
                link: channel.child_text("link"),
                icon: channel.child("image").and_then(|image| image.child_text("url")),
                items: channel.children_ns("", "item").map(rss_item).collect(),
            },
        }
    }
}

// ============================================================================
// Field Extraction
// ============================================================================

fn feed_title(raw: Option<String>) -> String {
    raw.map(|t| clean_title(&t)).unwrap_or_default()
}

fn item_title(raw: Option<String>) -> Option<String> {
    raw.map(|t| clean_title(&t)).filter(|t| !t.is_empty())
}

/// Picks the `href` of the alternate link: the first `link` without `rel`
/// or with `rel="alternate"`, else the first `link` at all.
fn atom_link(parent: &Element, prefix: &str) -> Option<String> {
    let mut links = parent
        .children_ns(prefix, "link")
        .filter(|link| link.attr("href").is_some_and(|h| !h.trim().is_empty()));
    let first = links.next()?;

    std::iter::once(first)
        .chain(links)
        .find(|link| matches!(link.attr("rel"), None | Some("alternate")))
        .unwrap_or(first)
        .attr("href")
        .map(|href| href.trim().to_string())
}

fn atom_item(entry: &Element, prefix: &str) -> ParsedItem {
    ParsedItem {
        id: entry.child_text_ns(prefix, "id"),
        title: item_title(entry.child_text_ns(prefix, "title")),
        link: atom_link(entry, prefix),
        summary: entry.child_text_ns(prefix, "summary"),
        content: entry.child_text_ns(prefix, "content"),
        published: entry
            .child_text_ns(prefix, "updated")
            .and_then(|d| parse_date(&d))
            .or_else(|| {
                entry
                    .child_text_ns(prefix, "published")
                    .and_then(|d| parse_date(&d))
            }),
    }
}

fn rdf_item(item: &Element) -> ParsedItem {
    ParsedItem {
        id: item
            .attr("rdf:about")
            .map(str::trim)
            .filter(|about| !about.is_empty())
            .map(str::to_string),
        title: item_title(item.child_text("title")),
        link: item.child_text("link"),
        summary: item.child_text("description"),
        content: item.child_text("content:encoded"),
        published: item.child_text("dc:date").and_then(|d| parse_date(&d)),
    }
}

fn rss_item(item: &Element) -> ParsedItem {
    ParsedItem {
        id: item.child_text("guid"),
        title: item_title(item.child_text("title")),
        link: item.child_text("link"),
        summary: item.child_text("description"),
        content: item.child_text("content:encoded"),
        published: item
            .child_text("pubDate")
            .and_then(|d| parse_date(&d))
            .or_else(|| item.child_text("dc:date").and_then(|d| parse_date(&d))),
    }
}

/// Parses the date formats seen in the wild: RFC 2822 (RSS), RFC 3339
/// (Atom, Dublin Core), and zone-less ISO 8601 which is taken as UTC.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s).or_else(|_| DateTime::parse_from_rfc3339(s)) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    tracing::debug!(date = %s, "Unrecognized feed date format");
    None
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parses a feed document.
///
/// # Errors
///
/// - `ParseError::Empty` if the body is blank or has no root element
/// - `ParseError::Malformed` if the XML is structurally broken
/// - `ParseError::UnrecognizedFormat` if the root is not Atom, RDF or RSS
pub fn parse(xml: &str) -> Result<ParsedFeed, ParseError> {
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
    if xml.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let root = read_tree(xml)?;
    let document = FeedDocument::detect(&root)
        .ok_or_else(|| ParseError::UnrecognizedFormat(root.name.clone()))?;

    Ok(document.extract())
}

/// Like [`parse`], but for a raw response body.
///
/// The character encoding is taken from, in order: a byte order mark, the
/// `charset` parameter of `content_type`, the XML declaration. UTF-8 is
/// assumed when none of them names an encoding `encoding_rs` knows.
/// Malformed sequences are replaced rather than rejected.
pub fn parse_bytes(bytes: &[u8], content_type: Option<&str>) -> Result<ParsedFeed, ParseError> {
    let text = decode_body(bytes, content_type);
    parse(&text)
}

fn decode_body<'a>(bytes: &'a [u8], content_type: Option<&str>) -> Cow<'a, str> {
    let encoding = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| {
            // A declaration readable as ASCII cannot be UTF-16
            declared_encoding(bytes)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
                .map(Encoding::output_encoding)
        })
        .unwrap_or(UTF_8);

    // `decode` sniffs the BOM first and overrides `encoding` when one is present
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "Feed body contained malformed sequences");
    }
    text
}

/// `charset` parameter of a `Content-Type` header value.
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
            .filter(|value| !value.is_empty())
    })
}

/// `encoding` pseudo-attribute of a leading `<?xml ...?>` declaration.
fn declared_encoding(bytes: &[u8]) -> Option<&str> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let decl = bytes.trim_ascii_start().strip_prefix(b"<?xml")?;
    let end = decl.windows(2).position(|w| w == b"?>")?;
    let decl = std::str::from_utf8(&decl[..end]).ok()?;

    let rest = &decl[decl.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|&c| c == '"' || c == '\'')?;
    let value = &rest[1..];
    value.find(quote).map(|close| value[..close].trim())
}
