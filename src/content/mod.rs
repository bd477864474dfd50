//! Article text resolution.
//!
//! - [`article`] - readability-style extraction of title, body text and publication time
//! - [`render`] - the headless-browser rendering capability and its HTTP client
//! - [`fetcher`] - the tiered strategy: plain fetch, then render; tricky domains render directly

mod article;
mod fetcher;
mod render;
mod scripts;

use thiserror::Error;

use crate::http::FetchError;

pub use article::{parse_article, ArticleContent};
pub use fetcher::{unsupported_extension, ArticleFetcher, DEFAULT_TRICKY_DOMAINS};
pub use render::{DisabledRenderer, HttpRenderer, RenderError, RenderRequest, Renderer};
pub use scripts::PAGE_SCRIPTS;

/// Errors that can occur while resolving an article.
#[derive(Debug, Error)]
pub enum ArticleError {
    /// The URL points at a document or media file rather than an HTML page.
    #[error("Unsupported format: .{0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Render(#[from] RenderError),
    /// The page was retrieved but contains no identifiable article.
    #[error("No article found")]
    NoArticleFound,
}

impl ArticleError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArticleError::Fetch(e) => e.is_retryable(),
            ArticleError::Render(e) => e.is_retryable(),
            ArticleError::UnsupportedFormat(_) | ArticleError::NoArticleFound => false,
        }
    }
}
