//! Turns a user-supplied URL into feed registrations.

use thiserror::Error;
use url::Url;

use super::detect::{detect_type, ContentKind, DetectError};
use super::fetcher::{fetch_body, FetchError, FetchOptions};
use crate::storage::{Feed, FeedType};

const RSS_LINK_TYPE: &str = "application/rss+xml";
const ATOM_LINK_TYPE: &str = "application/atom+xml";

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The submitted URL is empty, unparseable, or not http(s)
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// The request itself failed (network, non-200 status, timeout, size)
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    /// Declared as a feed, but the root element is not one we parse
    #[error("{url} is not a recognised feed: {source}")]
    Detect {
        url: String,
        #[source]
        source: DetectError,
    },
    /// Neither a feed media type nor HTML
    #[error("unexpected content type: {0:?}")]
    UnsupportedContentType(String),
}

/// Finds the feeds behind `url`.
///
/// If the response is itself a feed, returns that one feed with its format
/// detected from the root element. If it is an HTML page, returns every
/// feed reference on the page (see [`find_feed_links`]), which may be none.
///
/// # Errors
///
/// Returns [`DiscoveryError`] on an invalid URL, a failed request, a feed
/// body with an unrecognised root, or a content type that is neither feed
/// nor HTML.
pub async fn discover_feeds(
    client: &reqwest::Client,
    url: &str,
    options: FetchOptions,
) -> Result<Vec<Feed>, DiscoveryError> {
    let url = normalize_url(url)?;

    let body = fetch_body(client, &url, options)
        .await
        .map_err(|source| DiscoveryError::Fetch {
            url: url.clone(),
            source,
        })?;
    let content_type = body.content_type.unwrap_or_default();

    match ContentKind::from_content_type(&content_type) {
        Some(ContentKind::Feed) => {
            let kind = detect_type(&body.bytes).map_err(|source| DiscoveryError::Detect {
                url: url.clone(),
                source,
            })?;
            tracing::debug!(url = %url, kind = %kind, "URL is a feed");
            Ok(vec![Feed::new(url, kind)])
        }
        Some(ContentKind::Html) => {
            let base = Url::parse(&url).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
            let html = String::from_utf8_lossy(&body.bytes);
            let feeds = find_feed_links(&html, &base);
            tracing::debug!(url = %url, found = feeds.len(), "Scanned page for feed links");
            Ok(feeds)
        }
        None => Err(DiscoveryError::UnsupportedContentType(content_type)),
    }
}

/// Trims `input` and prefixes `https://` when it has no scheme.
///
/// The returned string is what gets requested and, for a direct feed,
/// stored as its endpoint.
pub fn normalize_url(input: &str) -> Result<String, DiscoveryError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DiscoveryError::InvalidUrl("empty URL".to_owned()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };

    let parsed =
        Url::parse(&candidate).map_err(|e| DiscoveryError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DiscoveryError::InvalidUrl(format!(
            "{trimmed}: unsupported scheme {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(DiscoveryError::InvalidUrl(format!("{trimmed}: missing host")));
    }

    Ok(candidate)
}

// ============================================================================
// HTML Scanning
// ============================================================================

/// Collects feed references from an HTML page.
///
/// Order: `<link type="application/rss+xml">` elements, then
/// `<link type="application/atom+xml">`, then `<a>` elements whose `title`
/// contains "rss" (always registered as RSS). Document order is kept within
/// each group. Hrefs are resolved against `base`; ones that cannot be
/// resolved to an http(s) URL are skipped.
///
/// Uses simple string scanning (no HTML parser dependency).
pub fn find_feed_links(html: &str, base: &Url) -> Vec<Feed> {
    let tags = scan_tags(html);
    let mut feeds = Vec::new();

    for (link_type, kind) in [(RSS_LINK_TYPE, FeedType::Rss), (ATOM_LINK_TYPE, FeedType::Atom)] {
        let links = tags
            .iter()
            .filter(|tag| tag.name == "link")
            .filter(|tag| {
                tag.attr("type")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(link_type))
            })
            .filter_map(|tag| resolve_href(tag, base))
            .map(|endpoint| Feed::new(endpoint, kind));
        feeds.extend(links);
    }

    let anchors = tags
        .iter()
        .filter(|tag| tag.name == "a")
        .filter(|tag| {
            tag.attr("title")
                .is_some_and(|t| t.to_lowercase().contains("rss"))
        })
        .filter_map(|tag| resolve_href(tag, base))
        .map(|endpoint| Feed::new(endpoint, FeedType::Rss));
    feeds.extend(anchors);

    feeds
}

/// A start tag with lower-cased name and attribute names.
#[derive(Debug)]
struct Tag<'a> {
    name: String,
    attrs: Vec<(String, &'a str)>,
}

impl Tag<'_> {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

/// Extracts every `<link>` and `<a>` start tag, skipping comments.
fn scan_tags(html: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];

        if let Some(comment) = rest.strip_prefix("!--") {
            match comment.find("-->") {
                Some(end) => {
                    rest = &comment[end + 3..];
                    continue;
                }
                None => break,
            }
        }

        let name_len = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_len].to_ascii_lowercase();
        if name != "link" && name != "a" {
            continue;
        }

        let (attrs, consumed) = scan_attrs(&rest[name_len..]);
        tags.push(Tag { name, attrs });
        rest = &rest[name_len + consumed..];
    }

    tags
}

/// Parses attributes up to the closing `>`.
///
/// Returns the attributes and the number of bytes consumed, including the
/// `>` when present. Values may be double-, single- or un-quoted.
fn scan_attrs(s: &str) -> (Vec<(String, &str)>, usize) {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let is_space = |b: u8| b.is_ascii_whitespace();
    let mut attrs = Vec::new();
    let mut i = 0;

    loop {
        while i < len && (is_space(bytes[i]) || bytes[i] == b'/') {
            i += 1;
        }
        if i >= len {
            return (attrs, len);
        }
        if bytes[i] == b'>' {
            return (attrs, i + 1);
        }

        let name_start = i;
        while i < len && !is_space(bytes[i]) && !matches!(bytes[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        let name = s[name_start..i].to_ascii_lowercase();

        while i < len && is_space(bytes[i]) {
            i += 1;
        }

        let mut value = "";
        if i < len && bytes[i] == b'=' {
            i += 1;
            while i < len && is_space(bytes[i]) {
                i += 1;
            }
            if i < len && matches!(bytes[i], b'"' | b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < len && bytes[i] != quote {
                    i += 1;
                }
                value = &s[value_start..i];
                i = (i + 1).min(len);
            } else {
                let value_start = i;
                while i < len && !is_space(bytes[i]) && bytes[i] != b'>' {
                    i += 1;
                }
                value = &s[value_start..i];
            }
        }

        if !name.is_empty() {
            attrs.push((name, value));
        }
    }
}

/// Resolves a tag's `href` against `base`, keeping absolute URLs verbatim.
fn resolve_href(tag: &Tag<'_>, base: &Url) -> Option<String> {
    let href = decode_char_refs(tag.attr("href")?.trim());
    if href.is_empty() {
        return None;
    }

    if let Ok(absolute) = Url::parse(&href) {
        return matches!(absolute.scheme(), "http" | "https").then_some(href);
    }

    match base.join(&href) {
        Ok(resolved) if matches!(resolved.scheme(), "http" | "https") => Some(resolved.into()),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(href = %href, error = %e, "Skipping malformed feed link");
            None
        }
    }
}

/// Decodes the character references that commonly appear in attribute values.
fn decode_char_refs(value: &str) -> String {
    if !value.contains('&') {
        return value.to_owned();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS_DOC: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Example</title></channel></rss>"#;

    const ATOM_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>Example</title></feed>"#;

    fn base() -> Url {
        Url::parse("https://example.com/blog/").unwrap()
    }

    fn endpoints(feeds: &[Feed]) -> Vec<(&str, FeedType)> {
        feeds.iter().map(|f| (f.endpoint.as_str(), f.kind)).collect()
    }

    async fn serve(body: &str, content_type: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_owned(), content_type))
            .mount(&mock_server)
            .await;
        mock_server
    }

    // --- HTML scanning ---

    #[test]
    fn test_find_rss_before_atom() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="http://example.com/atom">
            <link rel="alternate" type="application/rss+xml" href="http://example.com/rss">
        </head></html>"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![
                ("http://example.com/rss", FeedType::Rss),
                ("http://example.com/atom", FeedType::Atom),
            ]
        );
    }

    #[test]
    fn test_find_keeps_document_order_within_group() {
        let html = r#"
            <link type="application/rss+xml" href="/one">
            <link type="application/rss+xml" href="/two">
            <link type="application/rss+xml" href="/three">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![
                ("https://example.com/one", FeedType::Rss),
                ("https://example.com/two", FeedType::Rss),
                ("https://example.com/three", FeedType::Rss),
            ]
        );
    }

    #[test]
    fn test_find_resolves_relative_hrefs() {
        let html = r#"<link type="application/rss+xml" href="rss">
            <link type="application/atom+xml" href="../atom.xml">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![
                ("https://example.com/blog/rss", FeedType::Rss),
                ("https://example.com/atom.xml", FeedType::Atom),
            ]
        );
    }

    #[test]
    fn test_find_protocol_relative_href() {
        let html = r#"<link type="application/rss+xml" href="//cdn.example.com/feed.xml">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![("https://cdn.example.com/feed.xml", FeedType::Rss)]
        );
    }

    #[test]
    fn test_find_anchor_with_rss_title() {
        let html = r#"<body>
            <a href="/about" title="About us">About</a>
            <a href="https://blog.golang.org/feed.atom" title="Go RSS">Feed</a>
            <link type="application/atom+xml" href="/atom">
        </body>"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![
                ("https://example.com/atom", FeedType::Atom),
                ("https://blog.golang.org/feed.atom", FeedType::Rss),
            ]
        );
    }

    #[test]
    fn test_find_attribute_variants() {
        let html = "<LINK HREF='/single' TYPE='Application/RSS+XML'>\
            <link type=application/rss+xml href=/unquoted>\
            <link\n  type = \"application/rss+xml\"\n  href = \"/spaced\" />";
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![
                ("https://example.com/single", FeedType::Rss),
                ("https://example.com/unquoted", FeedType::Rss),
                ("https://example.com/spaced", FeedType::Rss),
            ]
        );
    }

    #[test]
    fn test_find_skips_comments() {
        let html = r#"<!-- <link type="application/rss+xml" href="/old"> -->
            <link type="application/rss+xml" href="/new">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![("https://example.com/new", FeedType::Rss)]
        );
    }

    #[test]
    fn test_find_decodes_entities_in_href() {
        let html = r#"<link type="application/rss+xml" href="/feed?a=1&amp;b=2">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![("https://example.com/feed?a=1&b=2", FeedType::Rss)]
        );
    }

    #[test]
    fn test_find_skips_unusable_hrefs() {
        let html = r#"
            <link type="application/rss+xml">
            <link type="application/rss+xml" href="">
            <link type="application/rss+xml" href="http://[::1">
            <a title="RSS" href="javascript:void(0)">x</a>
            <link type="application/rss+xml" href="/ok">"#;
        assert_eq!(
            endpoints(&find_feed_links(html, &base())),
            vec![("https://example.com/ok", FeedType::Rss)]
        );
    }

    #[test]
    fn test_find_nothing_in_plain_page() {
        let html = r#"<html><head><link rel="stylesheet" href="/style.css"></head>
            <body><a href="/rss">no title</a></body></html>"#;
        assert!(find_feed_links(html, &base()).is_empty());
    }

    // --- URL normalisation ---

    #[test]
    fn test_normalize_adds_https_scheme() {
        assert_eq!(
            normalize_url("  domainwheel.com/feed/ ").unwrap(),
            "https://domainwheel.com/feed/"
        );
        assert_eq!(
            normalize_url("http://example.com/rss").unwrap(),
            "http://example.com/rss"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        for input in ["", "   ", "ftp://example.com/feed", "https://", "not a url"] {
            assert!(
                matches!(normalize_url(input), Err(DiscoveryError::InvalidUrl(_))),
                "{input:?}"
            );
        }
    }

    // --- End to end against a mock server ---

    #[tokio::test]
    async fn test_discover_html_page() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="http://example.com/rss">
            <link rel="alternate" type="application/atom+xml" href="http://example.com/atom">
        </head></html>"#;
        let mock_server = serve(html, "text/html; charset=utf-8").await;

        let client = reqwest::Client::new();
        let feeds = discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(
            endpoints(&feeds),
            vec![
                ("http://example.com/rss", FeedType::Rss),
                ("http://example.com/atom", FeedType::Atom),
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_relative_link_uses_page_url() {
        let html = r#"<link type="application/rss+xml" href="rss">"#;
        let mock_server = serve(html, "text/html").await;

        let client = reqwest::Client::new();
        let feeds = discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(
            endpoints(&feeds),
            vec![(format!("{}/rss", mock_server.uri()).as_str(), FeedType::Rss)]
        );
    }

    #[tokio::test]
    async fn test_discover_direct_feed_content_types() {
        let cases = [
            ("application/rss+xml", RSS_DOC, FeedType::Rss),
            ("application/atom+xml", ATOM_DOC, FeedType::Atom),
            ("text/xml; charset=UTF-8", RSS_DOC, FeedType::Rss),
            ("application/xml", ATOM_DOC, FeedType::Atom),
        ];
        for (content_type, body, expected) in cases {
            let mock_server = serve(body, content_type).await;
            let url = format!("{}/feed", mock_server.uri());

            let client = reqwest::Client::new();
            let feeds = discover_feeds(&client, &url, FetchOptions::default())
                .await
                .unwrap();
            assert_eq!(endpoints(&feeds), vec![(url.as_str(), expected)], "{content_type}");
        }
    }

    #[tokio::test]
    async fn test_discover_feed_with_unknown_root() {
        let mock_server = serve("<html><body/></html>", "application/xml").await;

        let client = reqwest::Client::new();
        let err = discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Detect {
                source: DetectError::UnexpectedRoot(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_discover_unsupported_content_type() {
        let mock_server = serve("{}", "application/json").await;

        let client = reqwest::Client::new();
        let err = discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedContentType(ref t) if t == "application/json"));
    }

    #[tokio::test]
    async fn test_discover_non_200_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Fetch {
                source: FetchError::HttpStatus(404),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_discover_sends_identifying_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "MorningPost/0.1"))
            .and(header("accept", "*/*"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RSS_DOC, "application/rss+xml"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        discover_feeds(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_discover_invalid_url() {
        let client = reqwest::Client::new();
        let result = discover_feeds(&client, "not a url", FetchOptions::default()).await;
        assert!(matches!(result, Err(DiscoveryError::InvalidUrl(_))));
    }
}
