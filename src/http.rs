//! Shared HTTP plumbing: client construction, browser-like request headers
//! and bounded body reading.

use std::time::Duration;

use futures::StreamExt;
use rand::seq::IndexedRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use thiserror::Error;

use crate::util::decode_html;

/// Default request timeout for direct fetches.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Desktop browser user agents rotated across requests.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:132.0) Gecko/20100101 Firefox/132.0",
];

/// Referrers that make a request look like it arrived from search or social.
pub const REFERRERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
    "https://news.google.com/",
    "https://t.co/",
];

/// Errors that can occur while fetching a resource over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded its timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::IncompleteResponse { .. } => true,
            FetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            FetchError::ResponseTooLarge => false,
        }
    }
}

/// Picks a random user agent and referrer.
pub fn disguise() -> (&'static str, &'static str) {
    let mut rng = rand::rng();
    let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
    let referrer = REFERRERS.choose(&mut rng).copied().unwrap_or(REFERRERS[0]);
    (user_agent, referrer)
}

/// Redirect policy with loop detection and a hop limit.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
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

/// Builds the HTTP client shared by feed, article, render and LLM requests.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// GETs `url` with a randomized browser disguise and returns the body,
/// bounded by `limit` bytes and `timeout`.
///
/// Does not retry; retries belong to the caller's step policy.
pub async fn get_disguised(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    tokio::time::timeout(timeout, async {
        let response = send_disguised(client, url, accept).await?;
        read_limited_bytes(response, limit).await
    })
    .await
    .map_err(|_| FetchError::Timeout)?
}

/// Like [`get_disguised`], but decodes the body as HTML using the charset
/// from the Content-Type header or the page itself.
pub async fn get_disguised_html(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    limit: usize,
    timeout: Duration,
) -> Result<String, FetchError> {
    tokio::time::timeout(timeout, async {
        let response = send_disguised(client, url, accept).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = read_limited_bytes(response, limit).await?;
        Ok::<_, FetchError>(decode_html(&bytes, content_type.as_deref()))
    })
    .await
    .map_err(|_| FetchError::Timeout)?
}

async fn send_disguised(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
) -> Result<reqwest::Response, FetchError> {
    let (user_agent, referrer) = disguise();

    let response = client
        .get(url)
        .header(USER_AGENT, user_agent)
        .header(REFERER, referrer)
        .header(ACCEPT, accept)
        .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }
    Ok(response)
}

/// Reads a response body, refusing anything larger than `limit` bytes and
/// flagging bodies shorter than their declared Content-Length.
pub async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

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
