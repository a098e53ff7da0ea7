use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, Response};
use thiserror::Error;

use crate::config::Config;
use crate::shutdown::Shutdown;

/// Maximum redirects followed for a single request
const MAX_REDIRECTS: usize = 10;

/// Errors from the HTTP layer.
///
/// A non-success status is not an error here; callers decide what a 404 or
/// 500 means for them.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, invalid URL, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// No complete response within the deadline; the request was dropped
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Shutdown was triggered while the request was in flight
    #[error("Request cancelled by shutdown")]
    Cancelled,
    /// Response body exceeded the configured size limit
    #[error("Response exceeds {0} bytes")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Per-request options for [`HttpFetcher::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    /// Overrides the fetcher's default deadline
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn head() -> Self {
        Self {
            method: Method::HEAD,
            timeout: None,
        }
    }
}

/// Result of a HEAD probe. The response itself is already released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub status: u16,
    /// Raw `Content-Length` header, if sent
    pub content_length: Option<String>,
}

/// A fully read GET response.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Time-bounded HTTP client shared by the whole pipeline.
///
/// Every request races its deadline and the shutdown signal; whichever
/// fires first drops the request future, which closes the connection.
/// Cloning is cheap (the reqwest client is reference counted).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    shutdown: Shutdown,
}

impl HttpFetcher {
    /// Builds a client from the configured user agent and request timeout.
    pub fn new(config: &Config, shutdown: Shutdown) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self::with_client(client, config.request_timeout(), shutdown))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration, shutdown: Shutdown) -> Self {
        Self {
            client,
            timeout,
            shutdown,
        }
    }

    /// Default per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a request and returns once response headers arrive.
    ///
    /// The body is not read; the caller owns the returned response and
    /// releases the connection by reading or dropping it.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response, FetchError> {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let request = self.client.request(options.method, url);
        self.bounded(timeout, async move { request.send().await.map_err(FetchError::from) })
            .await
    }

    /// Sends a HEAD request and reports status and `Content-Length`.
    pub async fn probe(&self, url: &str) -> Result<Probe, FetchError> {
        let response = self.fetch(url, FetchOptions::head()).await?;
        let probe = Probe {
            status: response.status().as_u16(),
            content_length: header_string(&response, CONTENT_LENGTH),
        };
        // Release the connection without waiting for a body
        drop(response);
        Ok(probe)
    }

    /// GETs `url` and reads the whole body, both under one deadline.
    ///
    /// # Errors
    ///
    /// - [`FetchError::ResponseTooLarge`] if the body exceeds `limit`
    /// - [`FetchError::Timeout`] / [`FetchError::Cancelled`] as for [`fetch`](Self::fetch)
    pub async fn fetch_body(&self, url: &str, limit: usize) -> Result<FetchedBody, FetchError> {
        let request = self.client.get(url);
        self.bounded(self.timeout, async move {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let content_type = header_string(&response, CONTENT_TYPE);
            let bytes = read_limited_bytes(response, limit).await?;
            Ok::<_, FetchError>(FetchedBody {
                status,
                content_type,
                bytes,
            })
        })
        .await
    }

    async fn bounded<T>(
        &self,
        timeout: Duration,
        work: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(timeout, work) => {
                result.map_err(|_| FetchError::Timeout(timeout))?
            }
        }
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

async fn read_limited_bytes(response: Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    // Fewer bytes than Content-Length means the connection dropped mid-body
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(timeout_ms: u64) -> HttpFetcher {
        HttpFetcher::with_client(
            reqwest::Client::new(),
            Duration::from_millis(timeout_ms),
            Shutdown::never(),
        )
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = fetcher(1000)
            .fetch(&format!("{}/missing", server.uri()), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let result = fetcher(50)
            .fetch(&format!("{}/slow", server.uri()), FetchOptions::default())
            .await;
        assert!(matches!(result, Err(FetchError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_per_request_timeout_override() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let options = FetchOptions {
            method: Method::GET,
            timeout: Some(Duration::from_millis(30)),
        };
        let result = fetcher(5000)
            .fetch(&format!("{}/slow", server.uri()), options)
            .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let (trigger, listener) = shutdown::channel();
        let fetcher = HttpFetcher::with_client(
            reqwest::Client::new(),
            Duration::from_secs(10),
            listener,
        );
        let url = format!("{}/slow", server.uri());
        let request = tokio::spawn(async move { fetcher.fetch(&url, FetchOptions::default()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        let result = tokio::time::timeout(Duration::from_secs(1), request)
            .await
            .expect("cancelled request should return promptly")
            .unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_probe_reports_status_and_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/icon.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "42")
                    .set_body_bytes(vec![7u8; 42]),
            )
            .mount(&server)
            .await;

        let probe = fetcher(1000)
            .probe(&format!("{}/icon.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.content_length.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_fetch_body_reads_bytes_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"<rss/>".to_vec(), "application/rss+xml"))
            .mount(&server)
            .await;

        let body = fetcher(1000)
            .fetch_body(&format!("{}/feed", server.uri()), 1024)
            .await
            .unwrap();
        assert!(body.is_success());
        assert_eq!(body.bytes, b"<rss/>");
        assert_eq!(body.content_type.as_deref(), Some("application/rss+xml"));
    }

    #[tokio::test]
    async fn test_fetch_body_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let result = fetcher(1000)
            .fetch_body(&format!("{}/big", server.uri()), 1024)
            .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge(1024))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let result = fetcher(1000).fetch("not a url", FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
