use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::scripts::PAGE_SCRIPTS;
use crate::http::{read_limited_bytes, FetchError, REFERRERS};

const MAX_RENDER_RESPONSE: usize = 5 * 1024 * 1024; // 5MB

/// Overall budget for one render call: navigation (30s) plus script and
/// selector waits.
const RENDER_TIMEOUT: Duration = Duration::from_secs(45);

/// Mobile browsers get lighter pages and fewer interstitials.
const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/123.0.6312.87 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; SM-S908B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
];

const REJECTED_RESOURCE_TYPES: &[&str] = &["image", "media", "font", "websocket"];

const WAIT_FOR_SELECTOR: &str = "article, .article, .content, .post, #article, main";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Render response failed validation: {0}")]
    Validation(String),
    #[error("Render service reported failure: {0}")]
    Rejected(String),
    #[error("No render service configured")]
    Unavailable,
}

impl RenderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::Fetch(e) => e.is_retryable(),
            RenderError::Validation(_) | RenderError::Rejected(_) | RenderError::Unavailable => {
                false
            }
        }
    }
}

/// Everything a headless browser needs to load one article.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub user_agent: &'static str,
    pub referrer: &'static str,
    /// DOM-mutating scripts, executed in order.
    pub scripts: &'static [&'static str],
    pub reject_resource_types: &'static [&'static str],
    pub wait_for_selector: &'static str,
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
}

impl RenderRequest {
    /// Request for an article page with a random mobile identity.
    pub fn for_article(url: &str) -> Self {
        let mut rng = rand::rng();
        Self {
            url: url.to_string(),
            user_agent: MOBILE_USER_AGENTS
                .choose(&mut rng)
                .copied()
                .unwrap_or(MOBILE_USER_AGENTS[0]),
            referrer: REFERRERS.choose(&mut rng).copied().unwrap_or(REFERRERS[0]),
            scripts: PAGE_SCRIPTS,
            reject_resource_types: REJECTED_RESOURCE_TYPES,
            wait_for_selector: WAIT_FOR_SELECTOR,
            navigation_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(5),
        }
    }

    /// JSON body understood by Browser Rendering style `/content` endpoints.
    fn to_json(&self) -> serde_json::Value {
        let scripts: Vec<_> = self.scripts.iter().map(|s| json!({ "content": s })).collect();
        json!({
            "url": self.url,
            "userAgent": self.user_agent,
            "setExtraHTTPHeaders": {
                "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                "Accept-Language": "en-US,en;q=0.5",
                "DNT": "1",
                "Sec-Fetch-Dest": "document",
                "Sec-Fetch-Mode": "navigate",
                "Sec-Fetch-Site": "none",
                "Sec-Fetch-User": "?1",
                "Upgrade-Insecure-Requests": "1",
            },
            "cookies": [],
            "gotoOptions": {
                "waitUntil": "networkidle0",
                "timeout": self.navigation_timeout.as_millis() as u64,
                "referer": self.referrer,
            },
            "viewport": {
                "width": 390,
                "height": 844,
                "deviceScaleFactor": 3,
                "isMobile": true,
                "hasTouch": true,
                "isLandscape": false,
            },
            "rejectResourceTypes": self.reject_resource_types,
            "bestAttempt": true,
            "addScriptTag": scripts,
            "waitForSelector": {
                "selector": self.wait_for_selector,
                "timeout": self.selector_timeout.as_millis() as u64,
            },
        })
    }
}

/// Headless-browser rendering capability.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Loads the page, runs the request's scripts and returns the final HTML.
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError>;
}

#[derive(Debug, Deserialize)]
struct RenderIssue {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    // Services report the outcome as `success`, `status` or both
    success: Option<bool>,
    status: Option<bool>,
    #[serde(default)]
    errors: Vec<RenderIssue>,
    result: Option<String>,
}

impl RenderResponse {
    /// Succeeded unless any reported flag is false; `None` when no flag is present.
    fn succeeded(&self) -> Option<bool> {
        match (self.success, self.status) {
            (None, None) => None,
            (success, status) => Some(success.unwrap_or(true) && status.unwrap_or(true)),
        }
    }
}

/// Renders pages through an HTTP rendering service (e.g. Cloudflare
/// Browser Rendering `/content`).
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<SecretString>,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client, endpoint: String, api_token: Option<SecretString>) -> Self {
        Self {
            client,
            endpoint,
            api_token,
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let mut builder = self.client.post(&self.endpoint).json(&request.to_json());
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let bytes = tokio::time::timeout(RENDER_TIMEOUT, async {
            let response = builder.send().await.map_err(FetchError::Network)?;
            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, MAX_RENDER_RESPONSE).await
        })
        .await
        .map_err(|_| FetchError::Timeout)??;

        let parsed: RenderResponse = serde_json::from_slice(&bytes)
            .map_err(|e| RenderError::Validation(e.to_string()))?;

        let succeeded = parsed
            .succeeded()
            .ok_or_else(|| RenderError::Validation("missing success flag".to_string()))?;
        if !succeeded {
            let messages: Vec<String> = parsed
                .errors
                .iter()
                .map(|issue| format!("{} ({})", issue.message, issue.code))
                .collect();
            return Err(RenderError::Rejected(if messages.is_empty() {
                "no error details".to_string()
            } else {
                messages.join("; ")
            }));
        }

        let html = parsed
            .result
            .ok_or_else(|| RenderError::Validation("missing result".to_string()))?;

        tracing::debug!(url = %request.url, bytes = html.len(), "Rendered page");
        Ok(html)
    }
}

/// Stand-in used when no rendering service is configured.
pub struct DisabledRenderer;

#[async_trait]
impl Renderer for DisabledRenderer {
    async fn render(&self, _request: &RenderRequest) -> Result<String, RenderError> {
        Err(RenderError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn renderer(server: &MockServer) -> HttpRenderer {
        HttpRenderer::new(
            reqwest::Client::new(),
            format!("{}/content", server.uri()),
            Some(SecretString::from("render-token")),
        )
    }

    #[test]
    fn test_request_carries_scripts_and_exclusions() {
        let request = RenderRequest::for_article("https://wire.example/story");
        let body = request.to_json();

        assert_eq!(body["url"], "https://wire.example/story");
        assert_eq!(body["addScriptTag"].as_array().unwrap().len(), 7);
        assert_eq!(
            body["rejectResourceTypes"],
            json!(["image", "media", "font", "websocket"])
        );
        assert_eq!(body["waitForSelector"]["timeout"], 5000);
        assert_eq!(body["gotoOptions"]["timeout"], 30000);
        assert!(MOBILE_USER_AGENTS.contains(&request.user_agent));
        assert!(REFERRERS.contains(&request.referrer));
    }

    #[tokio::test]
    async fn test_render_success_returns_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .and(header("authorization", "Bearer render-token"))
            .and(body_partial_json(json!({ "url": "https://wire.example/story" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": "<html><body>ok</body></html>"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let html = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap();
        assert_eq!(html, "<html><body>ok</body></html>");
    }

    #[tokio::test]
    async fn test_render_reported_failure_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": false,
                "errors": [{ "code": 5001, "message": "navigation timeout" }]
            })))
            .mount(&server)
            .await;

        let err = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        match err {
            RenderError::Rejected(msg) => assert!(msg.contains("navigation timeout")),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_render_accepts_both_outcome_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "status": true,
                "errors": [],
                "result": "<html><body>ok</body></html>"
            })))
            .mount(&server)
            .await;

        let html = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap();
        assert_eq!(html, "<html><body>ok</body></html>");
    }

    #[tokio::test]
    async fn test_render_conflicting_outcome_keys_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "status": false,
                "result": "<html></html>"
            })))
            .mount(&server)
            .await;

        let err = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Rejected(msg) if msg == "no error details"));
    }

    #[tokio::test]
    async fn test_render_without_outcome_flag_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "<html></html>"
            })))
            .mount(&server)
            .await;

        let err = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_render_unexpected_shape_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let err = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_render_http_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = renderer(&server)
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Fetch(FetchError::HttpStatus(503))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_disabled_renderer() {
        let err = DisabledRenderer
            .render(&RenderRequest::for_article("https://wire.example/story"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Unavailable));
    }
}
