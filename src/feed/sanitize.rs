use std::borrow::Cow;

use url::Url;

use crate::util::html::{tokenize, Attr, StartTag, Token};
use crate::util::{decode_entities, origin_of, parse_http_url};

/// Rewrites an article HTML fragment for display outside its site.
///
/// - `<img>` with a relative `src` gets an absolute URL resolved against the
///   origin of `base_link`
/// - `<a>` loses its `style` attribute
///
/// Every other byte is copied through unchanged. If the fragment cannot be
/// tokenized the original is returned as-is and a warning is logged.
pub fn sanitize(html: &str, base_link: &str) -> String {
    if !html.contains('<') {
        return html.to_string();
    }

    let tokens = match tokenize(html) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(base = %base_link, error = %e, "Could not sanitize article content, keeping original");
            return html.to_string();
        }
    };

    let origin = parse_http_url(base_link).and_then(|url| origin_of(&url));
    let mut out = String::with_capacity(html.len() + 64);

    for token in &tokens {
        match token {
            Token::Text(text) | Token::Other(text) => out.push_str(text),
            Token::StartTag(tag) => match rewrite_tag(tag, origin.as_ref()) {
                Some(rewritten) => out.push_str(&rewritten),
                None => out.push_str(&html[tag.span.clone()]),
            },
        }
    }

    out
}

/// Returns the rewritten tag, or `None` to keep the original text.
fn rewrite_tag(tag: &StartTag<'_>, origin: Option<&Url>) -> Option<String> {
    if tag.is("img") {
        let origin = origin?;
        let src = tag.attr("src")?;
        let absolute = absolutize(src.value?, origin)?;
        let attrs = tag.attrs.iter().map(|attr| {
            if std::ptr::eq(attr, src) {
                Cow::Owned(format!("{}=\"{}\"", attr.name, escape_attr(&absolute)))
            } else {
                Cow::Borrowed(attr.raw)
            }
        });
        return Some(rebuild(tag, attrs));
    }

    if tag.is("a") && tag.attr("style").is_some() {
        let attrs = tag
            .attrs
            .iter()
            .filter(|attr| !attr.is("style"))
            .map(|attr: &Attr<'_>| Cow::Borrowed(attr.raw));
        return Some(rebuild(tag, attrs));
    }

    None
}

/// Resolves a relative reference against `origin`; `None` if the value is
/// already absolute (any scheme, including `data:`) or unusable.
fn absolutize(value: &str, origin: &Url) -> Option<String> {
    let value = decode_entities(value.trim());
    if value.is_empty() || Url::parse(&value).is_ok() {
        return None;
    }
    origin.join(&value).ok().map(String::from)
}

fn escape_attr(value: &str) -> Cow<'_, str> {
    if value.contains(['&', '"']) {
        Cow::Owned(value.replace('&', "&amp;").replace('"', "&quot;"))
    } else {
        Cow::Borrowed(value)
    }
}

fn rebuild<'a>(tag: &StartTag<'_>, attrs: impl Iterator<Item = Cow<'a, str>>) -> String {
    let mut out = format!("<{}", tag.name);
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr);
    }
    out.push_str(if tag.self_closing { " />" } else { ">" });
    out
}
