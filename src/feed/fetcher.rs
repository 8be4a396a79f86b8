//! HTTP retrieval of feed documents.
//!
//! Every request carries the same `user-agent` and `accept` headers, only a
//! 200 response is accepted, and bodies are read under a size cap inside a
//! single timeout. Nothing is retried.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use thiserror::Error;

use super::article::Article;
use super::parser::{self, ParseError};
use crate::storage::Feed;

/// Sent on every request.
pub const USER_AGENT: &str = "MorningPost/0.1";
pub const ACCEPT: &str = "*/*";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 10;

/// Per-request limits applied to every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Covers the whole request, from connect to the last body byte.
    pub timeout: Duration,
    /// Largest body accepted, in bytes.
    pub max_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: MAX_FEED_SIZE,
        }
    }
}

/// Errors that can occur while fetching one feed.
///
/// Every variant is scoped to a single request: one feed failing never
/// affects another.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Any status other than 200 OK
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("response too large")]
    ResponseTooLarge,
    /// Body arrived but is not a decodable feed of the registered type
    #[error("{0}")]
    Parse(#[from] ParseError),
    /// The task fetching the feed panicked or was cancelled
    #[error("fetch task failed: {0}")]
    Worker(String),
}

/// A 200 response body with its declared media type.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Builds the shared HTTP client.
///
/// Redirects are followed up to ten hops with loop detection. Request
/// timeouts are enforced per call by [`fetch_body`], not here.
pub fn build_client() -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy())
        .pool_idle_timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev == url) {
            return attempt.error("redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// GETs `url` and reads the whole body.
///
/// Sends the fixed `user-agent` and `accept` headers. Anything but 200 is
/// [`FetchError::HttpStatus`]; bodies over `options.max_bytes` are
/// rejected; the entire exchange must finish within `options.timeout`.
pub async fn fetch_body(
    client: &reqwest::Client,
    url: &str,
    options: FetchOptions,
) -> Result<FetchedBody, FetchError> {
    let request = async {
        let response = client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, ACCEPT)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = read_limited_bytes(response, options.max_bytes).await?;

        Ok::<_, FetchError>(FetchedBody {
            content_type,
            bytes,
        })
    };

    tokio::time::timeout(options.timeout, request)
        .await
        .map_err(|_| FetchError::Timeout)?
}

/// Fetches `feed` and parses it with the parser for its registered type.
pub async fn fetch_articles(
    client: &reqwest::Client,
    feed: &Feed,
    options: FetchOptions,
) -> Result<Vec<Article>, FetchError> {
    let body = fetch_body(client, &feed.endpoint, options).await?;
    let articles = parser::parse(feed.kind, &body.bytes)?;
    tracing::debug!(feed = %feed.endpoint, count = articles.len(), "Fetched feed");
    Ok(articles)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FeedType;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Feed</title>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    async fn serve(template: ResponseTemplate) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[tokio::test]
    async fn test_fetch_sends_fixed_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header_eq("user-agent", USER_AGENT))
            .and(header_eq("accept", ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let body = fetch_body(&client, &url, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(body.bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_reports_content_type() {
        let mock_server = serve(
            ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html; charset=utf-8"),
        )
        .await;

        let client = reqwest::Client::new();
        let body = fetch_body(&client, &mock_server.uri(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(body.content_type.as_deref(), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_error() {
        for status in [201, 204, 404, 500] {
            let mock_server = serve(ResponseTemplate::new(status)).await;
            let client = reqwest::Client::new();

            match fetch_body(&client, &mock_server.uri(), FetchOptions::default()).await {
                Err(FetchError::HttpStatus(s)) => assert_eq!(s, status),
                other => panic!("Expected HttpStatus({status}), got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_server_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_body(&client, &mock_server.uri(), FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let mock_server = serve(
            ResponseTemplate::new(200)
                .set_body_string(VALID_RSS)
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let client = reqwest::Client::new();
        let options = FetchOptions {
            timeout: Duration::from_millis(50),
            ..FetchOptions::default()
        };
        let result = fetch_body(&client, &mock_server.uri(), options).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let mock_server = serve(ResponseTemplate::new(200).set_body_string("x".repeat(2048))).await;

        let client = reqwest::Client::new();
        let options = FetchOptions {
            max_bytes: 1024,
            ..FetchOptions::default()
        };
        let result = fetch_body(&client, &mock_server.uri(), options).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_fetch_articles_uses_registered_parser() {
        let mock_server = serve(ResponseTemplate::new(200).set_body_string(VALID_RSS)).await;
        let client = reqwest::Client::new();

        let feed = Feed::new(format!("{}/feed", mock_server.uri()), FeedType::Rss);
        let articles = fetch_articles(&client, &feed, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].feed_title(), "Test Feed");

        // Same body registered as Atom does not parse.
        let feed = Feed::new(format!("{}/feed", mock_server.uri()), FeedType::Atom);
        let result = fetch_articles(&client, &feed, FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_articles_malformed_body_is_parse_error() {
        let mock_server = serve(ResponseTemplate::new(200).set_body_string("{}")).await;
        let client = reqwest::Client::new();

        let feed = Feed::new(mock_server.uri(), FeedType::Rss);
        let result = fetch_articles(&client, &feed, FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_network_error() {
        // Nothing listens on the TCP port-multiplexer port.
        let client = build_client().unwrap();

        let result = fetch_body(&client, "http://127.0.0.1:1/feed", FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
