//! Durable ingestion workflows.
//!
//! - [`policy`] - per-step retry/backoff/timeout policies and the retry executor
//! - [`engine`] - the run queue, step log and worker/scheduler loops
//! - `scrape` - due feeds to new article rows
//! - `enrich` - new article rows to classified, terminal rows

mod engine;
mod enrich;
mod policy;
mod scrape;

use std::sync::Arc;
use std::time::Duration;

use crate::classify::Classifier;
use crate::content::ArticleFetcher;
use crate::ratelimit::RateLimiterOptions;
use crate::storage::Database;

pub use engine::{Engine, RunParams, RunReport, WorkflowContext, WorkflowKind, RUN_RETENTION};
pub use policy::{execute, Backoff, StepError, StepPolicy};
pub use scrape::{is_due, tier_interval};

/// Tunables shared by both workflows.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub feed_limiter: RateLimiterOptions,
    pub article_limiter: RateLimiterOptions,
    pub database_policy: StepPolicy,
    pub feed_policy: StepPolicy,
    pub article_policy: StepPolicy,
    pub classify_policy: StepPolicy,
    /// Feed items published longer ago than this are ignored.
    pub max_feed_item_age: Duration,
    /// Only articles published within this window are enriched.
    pub enrichment_window: Duration,
    pub enrichment_batch_size: i64,
    /// How many leftover articles to look for before chaining another run.
    pub backlog_sample: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            feed_limiter: RateLimiterOptions::FEEDS,
            article_limiter: RateLimiterOptions::ARTICLES,
            database_policy: StepPolicy::DATABASE,
            feed_policy: StepPolicy::FEED_SCRAPE,
            article_policy: StepPolicy::ARTICLE_SCRAPE,
            classify_policy: StepPolicy::CLASSIFY,
            max_feed_item_age: Duration::from_secs(7 * 24 * 60 * 60),
            enrichment_window: Duration::from_secs(48 * 60 * 60),
            enrichment_batch_size: 200,
            backlog_sample: 100,
        }
    }
}

/// Collaborators the workflows run against.
pub struct Pipeline {
    pub db: Database,
    pub client: reqwest::Client,
    pub articles: ArticleFetcher,
    pub classifier: Arc<dyn Classifier>,
    pub settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        db: Database,
        client: reqwest::Client,
        articles: ArticleFetcher,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            db,
            client,
            articles,
            classifier,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }
}
