use url::Url;

/// Parses `s` as an absolute `http`/`https` URL.
///
/// Returns `None` for relative references, other schemes, and garbage.
pub fn parse_http_url(s: &str) -> Option<Url> {
    let url = Url::parse(s.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// The origin of an http(s) URL as a base URL with an empty path,
/// e.g. `https://example.com:8080/a/b?c` → `https://example.com:8080/`.
pub fn origin_of(url: &Url) -> Option<Url> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&format!("{}/", origin.ascii_serialization())).ok()
}

/// Resolves a possibly relative reference against `base`.
///
/// Absolute references (any scheme) are returned as-is; protocol-relative
/// references inherit the base scheme.
pub fn resolve_against(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    base.join(reference).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_url_accepts_http_and_https() {
        assert!(parse_http_url("https://example.com/feed").is_some());
        assert!(parse_http_url("  http://example.com  ").is_some());
    }

    #[test]
    fn test_parse_http_url_rejects_other_inputs() {
        assert!(parse_http_url("/relative/icon.png").is_none());
        assert!(parse_http_url("ftp://example.com/icon.png").is_none());
        assert!(parse_http_url("data:image/png;base64,AAAA").is_none());
        assert!(parse_http_url("not a url").is_none());
        assert!(parse_http_url("").is_none());
    }

    #[test]
    fn test_origin_drops_path_query_and_fragment() {
        let url = Url::parse("https://example.com:8443/blog/feed.xml?x=1#top").unwrap();
        assert_eq!(
            origin_of(&url).unwrap().as_str(),
            "https://example.com:8443/"
        );
    }

    #[test]
    fn test_origin_of_default_port_is_omitted() {
        let url = Url::parse("https://x.com/feed").unwrap();
        assert_eq!(origin_of(&url).unwrap().as_str(), "https://x.com/");
    }

    #[test]
    fn test_resolve_relative_and_protocol_relative() {
        let base = Url::parse("https://x.com/").unwrap();
        assert_eq!(
            resolve_against(&base, "/a.png").unwrap().as_str(),
            "https://x.com/a.png"
        );
        assert_eq!(
            resolve_against(&base, "//cdn.x.com/a.png").unwrap().as_str(),
            "https://cdn.x.com/a.png"
        );
        assert_eq!(
            resolve_against(&base, "https://other.com/b.png")
                .unwrap()
                .as_str(),
            "https://other.com/b.png"
        );
        assert!(resolve_against(&base, "   ").is_none());
    }
}
