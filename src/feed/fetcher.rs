use crate::http::{get_disguised, FetchError, REQUEST_TIMEOUT};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/rdf+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

/// Downloads a feed document.
///
/// Uses a randomized browser user agent and referrer, a 30-second timeout
/// and a 10MB body cap. A non-2xx response is an error. Retrying is left to
/// the calling workflow step.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Request exceeded 30 seconds
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let bytes = get_disguised(client, url, FEED_ACCEPT, MAX_FEED_SIZE, REQUEST_TIMEOUT)
        .await
        .inspect_err(|e| tracing::warn!(feed = %url, error = %e, "Feed fetch failed"))?;

    tracing::debug!(feed = %url, bytes = bytes.len(), "Fetched feed");
    Ok(bytes)
}
