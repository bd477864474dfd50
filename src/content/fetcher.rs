use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::article::{parse_article, ArticleContent};
use super::render::{RenderError, RenderRequest, Renderer};
use super::ArticleError;
use crate::http::{get_disguised_html, REQUEST_TIMEOUT};
use crate::util::host_matches;

const MAX_ARTICLE_SIZE: usize = 5 * 1024 * 1024; // 5MB

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// File extensions that never lead to an HTML article.
const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "gz", "mp3", "mp4", "mov",
    "avi", "jpg", "jpeg", "png", "gif", "webp", "svg",
];

/// Publishers that gate content behind JavaScript or aggressive paywalls.
pub const DEFAULT_TRICKY_DOMAINS: &[&str] = &[
    "reuters.com",
    "nytimes.com",
    "politico.com",
    "science.org",
    "alarabiya.net",
    "reason.com",
    "telegraph.co.uk",
    "lawfaremedia.org",
    "liberation.fr",
    "france24.com",
];

/// Returns the offending extension when `url` points at a non-HTML document,
/// either through its path or through a URL that ends in the file name
/// (download endpoints such as `/download?file=report.pdf`).
pub fn unsupported_extension(url: &str) -> Option<String> {
    let lowered = url.to_ascii_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or_default();

    let path = url::Url::parse(without_fragment)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_default();

    let found = [path.as_str(), without_fragment]
        .into_iter()
        .filter_map(trailing_extension)
        .find(|ext| UNSUPPORTED_EXTENSIONS.contains(ext))
        .map(str::to_string);
    found
}

fn trailing_extension(s: &str) -> Option<&str> {
    let (_, ext) = s.rsplit('/').next()?.rsplit_once('.')?;
    Some(ext)
}

/// Resolves article text with the cheapest strategy that works: a plain
/// GET first, escalating to a headless render after a random pause.
/// Tricky domains go straight to rendering.
pub struct ArticleFetcher {
    client: reqwest::Client,
    renderer: Arc<dyn Renderer>,
    tricky_domains: Vec<String>,
    escalation_jitter: (Duration, Duration),
}

impl ArticleFetcher {
    pub fn new(client: reqwest::Client, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            client,
            renderer,
            tricky_domains: DEFAULT_TRICKY_DOMAINS.iter().map(|d| d.to_string()).collect(),
            escalation_jitter: (Duration::from_millis(500), Duration::from_millis(3000)),
        }
    }

    pub fn with_tricky_domains(mut self, domains: Vec<String>) -> Self {
        self.tricky_domains = domains;
        self
    }

    /// Bounds of the random pause before escalating to the render tier.
    pub fn with_escalation_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.escalation_jitter = (min, max.max(min));
        self
    }

    pub fn is_tricky(&self, domain: &str) -> bool {
        self.tricky_domains.iter().any(|d| host_matches(domain, d))
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.escalation_jitter;
        if max <= min {
            return min;
        }
        let ms = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    /// Fetches and extracts the article at `url`, whose host is `domain`.
    ///
    /// # Errors
    ///
    /// - [`ArticleError::UnsupportedFormat`] for document/media URLs, before any request
    /// - [`ArticleError::Render`] when the render tier fails
    /// - [`ArticleError::NoArticleFound`] when the rendered page has no article
    /// - [`ArticleError::Fetch`] when the plain fetch fails and no renderer is configured
    pub async fn fetch_article(&self, url: &str, domain: &str) -> Result<ArticleContent, ArticleError> {
        if let Some(ext) = unsupported_extension(url) {
            tracing::debug!(url = %url, extension = %ext, "Skipping unsupported format");
            return Err(ArticleError::UnsupportedFormat(ext));
        }

        if self.is_tricky(domain) {
            tracing::debug!(url = %url, domain = %domain, "Tricky domain, rendering directly");
            return self.fetch_rendered(url).await;
        }

        let direct_error = match self.fetch_direct(url).await {
            Ok(article) => return Ok(article),
            Err(e) => e,
        };

        let pause = self.jitter();
        tracing::debug!(
            url = %url,
            error = %direct_error,
            pause_ms = pause.as_millis() as u64,
            "Plain fetch failed, escalating to render"
        );
        tokio::time::sleep(pause).await;

        match self.fetch_rendered(url).await {
            Err(ArticleError::Render(RenderError::Unavailable)) => Err(direct_error),
            other => other,
        }
    }

    async fn fetch_direct(&self, url: &str) -> Result<ArticleContent, ArticleError> {
        let html =
            get_disguised_html(&self.client, url, HTML_ACCEPT, MAX_ARTICLE_SIZE, REQUEST_TIMEOUT)
                .await?;
        parse_article(&html)
    }

    async fn fetch_rendered(&self, url: &str) -> Result<ArticleContent, ArticleError> {
        let html = self.renderer.render(&RenderRequest::for_article(url)).await?;
        parse_article(&html)
    }
}
