//! Minimal HTML tag scanner for in-place rewriting.
//!
//! Splits a fragment into text runs, start tags (with parsed attributes) and
//! everything else (end tags, comments, doctypes), keeping byte spans into
//! the original string so callers can rewrite individual tags and copy the
//! rest through byte for byte. A DOM parser would re-serialize the whole
//! fragment; whole pages that are only read go through `scraper` instead.

use std::ops::Range;
use thiserror::Error;

/// The fragment could not be tokenized.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),
    #[error("unterminated comment at byte {0}")]
    UnterminatedComment(usize),
    #[error("unterminated attribute quote at byte {0}")]
    UnterminatedQuote(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    StartTag(StartTag<'a>),
    /// End tags, comments, doctypes, processing instructions.
    Other(&'a str),
}

#[derive(Debug, PartialEq, Eq)]
pub struct StartTag<'a> {
    /// Tag name as written.
    pub name: &'a str,
    pub attrs: Vec<Attr<'a>>,
    pub self_closing: bool,
    /// Byte range of the whole tag including `<` and `>`.
    pub span: Range<usize>,
}

impl<'a> StartTag<'a> {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// First attribute with the given name (ASCII case-insensitive).
    pub fn attr(&self, name: &str) -> Option<&Attr<'a>> {
        self.attrs.iter().find(|a| a.is(name))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Attr<'a> {
    pub name: &'a str,
    /// Unquoted value; `None` for bare attributes like `async`.
    pub value: Option<&'a str>,
    /// The attribute exactly as written, e.g. `src='a.png'`.
    pub raw: &'a str,
}

impl Attr<'_> {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Tokenizes an HTML fragment.
///
/// A `<` that does not open a tag (`a < b`) is treated as text. Anything that
/// opens a tag, comment or quoted attribute and never closes it is an error.
pub fn tokenize(html: &str) -> Result<Vec<Token<'_>>, MarkupError> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while let Some(offset) = html[pos..].find('<') {
        let start = pos + offset;
        let next = bytes.get(start + 1).copied();

        let (token, end) = match next {
            Some(b'!') if html[start..].starts_with("<!--") => {
                let close = html[start + 4..]
                    .find("-->")
                    .ok_or(MarkupError::UnterminatedComment(start))?;
                let end = start + 4 + close + 3;
                (Token::Other(&html[start..end]), end)
            }
            Some(b'!') | Some(b'?') | Some(b'/') => {
                let close = html[start..]
                    .find('>')
                    .ok_or(MarkupError::UnterminatedTag(start))?;
                let end = start + close + 1;
                (Token::Other(&html[start..end]), end)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let tag = parse_start_tag(html, start)?;
                let end = tag.span.end;
                (Token::StartTag(tag), end)
            }
            _ => {
                // Literal '<' in text
                pos = start + 1;
                continue;
            }
        };

        if start > text_start {
            tokens.push(Token::Text(&html[text_start..start]));
        }
        tokens.push(token);
        pos = end;
        text_start = end;
    }

    if text_start < html.len() {
        tokens.push(Token::Text(&html[text_start..]));
    }

    Ok(tokens)
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

/// Parses a start tag beginning at `start` (which points at `<`).
///
/// All delimiters are ASCII, so every index we slice at is a char boundary.
fn parse_start_tag(html: &str, start: usize) -> Result<StartTag<'_>, MarkupError> {
    let bytes = html.as_bytes();
    let len = bytes.len();
    let mut i = start + 1;

    let name_start = i;
    while i < len && !is_space(bytes[i]) && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }
    let name = &html[name_start..i];

    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while i < len && is_space(bytes[i]) {
            i += 1;
        }
        if i >= len {
            return Err(MarkupError::UnterminatedTag(start));
        }

        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    self_closing = true;
                    i += 2;
                    break;
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        let attr_start = i;
        while i < len
            && !is_space(bytes[i])
            && bytes[i] != b'='
            && bytes[i] != b'>'
            && bytes[i] != b'/'
        {
            i += 1;
        }
        if i == attr_start {
            // Stray '=' with no name; skip it
            i += 1;
            continue;
        }
        let attr_name = &html[attr_start..i];

        let mut j = i;
        while j < len && is_space(bytes[j]) {
            j += 1;
        }

        if j < len && bytes[j] == b'=' {
            j += 1;
            while j < len && is_space(bytes[j]) {
                j += 1;
            }
            if j >= len {
                return Err(MarkupError::UnterminatedTag(start));
            }

            let value = match bytes[j] {
                quote @ (b'"' | b'\'') => {
                    let value_start = j + 1;
                    let close = html[value_start..]
                        .find(quote as char)
                        .ok_or(MarkupError::UnterminatedQuote(j))?;
                    j = value_start + close + 1;
                    &html[value_start..value_start + close]
                }
                _ => {
                    let value_start = j;
                    while j < len && !is_space(bytes[j]) && bytes[j] != b'>' {
                        j += 1;
                    }
                    &html[value_start..j]
                }
            };

            attrs.push(Attr {
                name: attr_name,
                value: Some(value),
                raw: &html[attr_start..j],
            });
            i = j;
        } else {
            attrs.push(Attr {
                name: attr_name,
                value: None,
                raw: attr_name,
            });
        }
    }

    Ok(StartTag {
        name,
        attrs,
        self_closing,
        span: start..i,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn start_tags(html: &str) -> Vec<StartTag<'_>> {
        tokenize(html)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::StartTag(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_text_and_tags() {
        let tokens = tokenize("<p>Hello <b>world</b></p>").unwrap();
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[1], Token::Text("Hello "));
        assert_eq!(tokens[5], Token::Other("</p>"));
    }

    #[test]
    fn test_attribute_quoting_styles() {
        let tags = start_tags(r#"<img src="a.png" alt='x y' width=10 hidden>"#);
        let img = &tags[0];
        assert!(img.is("IMG"));
        assert_eq!(img.attr("src").unwrap().value, Some("a.png"));
        assert_eq!(img.attr("alt").unwrap().value, Some("x y"));
        assert_eq!(img.attr("width").unwrap().value, Some("10"));
        assert_eq!(img.attr("hidden").unwrap().value, None);
        assert_eq!(img.attr("alt").unwrap().raw, "alt='x y'");
    }

    #[test]
    fn test_self_closing_and_spaces_around_equals() {
        let tags = start_tags(r#"<img src = "a.png" />"#);
        assert!(tags[0].self_closing);
        assert_eq!(tags[0].attr("src").unwrap().value, Some("a.png"));
    }

    #[test]
    fn test_gt_inside_quoted_value() {
        let tags = start_tags(r#"<a title="1 > 0" href="/x">go</a>"#);
        assert_eq!(tags[0].attr("href").unwrap().value, Some("/x"));
    }

    #[test]
    fn test_literal_less_than_is_text() {
        let tokens = tokenize("a < b and c<3").unwrap();
        assert_eq!(tokens, vec![Token::Text("a < b and c<3")]);
    }

    #[test]
    fn test_comment_is_opaque() {
        let tags = start_tags("<!-- <img src=x> --><br>");
        assert_eq!(tags.len(), 1);
        assert!(tags[0].is("br"));
    }

    #[test]
    fn test_non_ascii_values() {
        let tags = start_tags("<img alt=\"café ☕\" src=\"/ü.png\">");
        assert_eq!(tags[0].attr("alt").unwrap().value, Some("café ☕"));
        assert_eq!(tags[0].attr("src").unwrap().value, Some("/ü.png"));
    }

    #[test]
    fn test_unterminated_tag() {
        assert_eq!(
            tokenize("<p>ok</p><img src=\"a.png\""),
            Err(MarkupError::UnterminatedTag(9))
        );
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            tokenize("<a href=\"/x>link</a>"),
            Err(MarkupError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_unterminated_comment() {
        assert_eq!(
            tokenize("<!-- never closed"),
            Err(MarkupError::UnterminatedComment(0))
        );
    }
}
