//! Article classification through an LLM.
//!
//! - [`prompt`] - the extraction instructions sent with every article
//! - [`openai`] - a classifier speaking the OpenAI-compatible chat-completions protocol

mod openai;
mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::ChatCompletionsClassifier;
pub use prompt::analysis_prompt;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Classifier request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Classifier returned HTTP {0}")]
    HttpStatus(u16),
    #[error("Classifier request timed out")]
    Timeout,
    #[error("Classifier response was not valid JSON: {0}")]
    MalformedResponse(String),
    #[error("Classifier output failed validation: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Completeness {
    Complete,
    PartialUseful,
    PartialUseless,
}

impl Completeness {
    pub fn as_str(self) -> &'static str {
        match self {
            Completeness::Complete => "COMPLETE",
            Completeness::PartialUseful => "PARTIAL_USEFUL",
            Completeness::PartialUseless => "PARTIAL_USELESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

impl Relevance {
    pub fn as_str(self) -> &'static str {
        match self {
            Relevance::Relevant => "RELEVANT",
            Relevance::NotRelevant => "NOT_RELEVANT",
        }
    }
}

/// Terse, clustering-oriented digest of a relevant story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub headline: String,
    pub entities: Vec<String>,
    pub event: String,
    pub context: String,
}

impl ArticleSummary {
    /// Renders the summary as four labeled lines.
    pub fn to_plain_text(&self) -> String {
        format!(
            "HEADLINE: {}\nENTITIES: {}\nEVENT: {}\nCONTEXT: {}",
            self.headline.trim(),
            self.entities.join(", "),
            self.event.trim(),
            self.context.trim()
        )
        .trim()
        .to_string()
    }
}

/// Structured classification of one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    /// ISO 639-1 code.
    pub language: String,
    /// ISO 3166-1 alpha-3 code, `GLOBAL` or `N/A`.
    pub location: String,
    pub completeness: Completeness,
    pub relevance: Relevance,
    #[serde(default)]
    pub summary: Option<ArticleSummary>,
}

impl ArticleAnalysis {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        if self.language.chars().count() != 2 {
            return Err(ClassifyError::Validation(format!(
                "language must be a 2-letter code, got {:?}",
                self.language
            )));
        }
        if self.location.chars().count() < 3 {
            return Err(ClassifyError::Validation(format!(
                "location must be at least 3 characters, got {:?}",
                self.location
            )));
        }
        Ok(())
    }
}

/// LLM classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies an article from its title and body text.
    async fn classify(&self, title: &str, body: &str) -> Result<ArticleAnalysis, ClassifyError>;
}
