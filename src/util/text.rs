use std::borrow::Cow;

use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity};

/// Longest entity name we bother looking up (`&CounterClockwiseContourIntegral;` is 33).
const MAX_ENTITY_LEN: usize = 40;

/// Decodes HTML character references without ever failing.
///
/// Handles the XML builtins, every HTML5 named entity, and decimal/hex
/// numeric references. Anything that does not resolve (a bare `&`, an unknown
/// name, an out-of-range code point) is copied through verbatim, so feeds that
/// mix escaped and unescaped ampersands still decode sensibly.
///
/// # Examples
///
/// ```
/// use feedpipe::util::decode_entities;
///
/// assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
/// assert_eq!(decode_entities("caf&eacute; &#8212; &#x263A;"), "café — ☺");
/// assert_eq!(decode_entities("AT&T"), "AT&T");
/// ```
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        let resolved = after
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| resolve_reference(&after[..end]).map(|r| (r, end)));

        match resolved {
            Some((replacement, end)) => {
                out.push_str(&replacement);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

fn resolve_reference(name: &str) -> Option<Cow<'static, str>> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        // NUL is not a valid character reference
        if code == 0 {
            return None;
        }
        return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
    }

    resolve_predefined_entity(name)
        .or_else(|| resolve_html5_entity(name))
        .map(Cow::Borrowed)
}

/// Decodes entities and tidies a feed or article title for storage.
///
/// Titles are frequently double-escaped (`&amp;amp;`) by publishing tools, so
/// decoding runs until the string stops changing (bounded to a few passes).
/// Control characters are dropped and runs of whitespace collapse to one
/// space.
pub fn clean_title(raw: &str) -> String {
    let mut decoded = raw.to_string();
    for _ in 0..3 {
        let next = decode_entities(&decoded).into_owned();
        if next == decoded {
            break;
        }
        decoded = next;
    }

    let mut out = String::with_capacity(decoded.len());
    for word in decoded
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
