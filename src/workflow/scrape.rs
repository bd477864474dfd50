use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use super::engine::{RunParams, WorkflowContext, WorkflowKind};
use super::policy::StepError;
use crate::feed::{fetch_feed, parse_feed};
use crate::ratelimit::{DomainRateLimiter, RateLimited};
use crate::storage::{NewArticle, Source};
use crate::util::validate_url;

impl RateLimited for Source {
    fn url(&self) -> &str {
        &self.url
    }
}

/// Poll interval of a scrape tier. Unknown tiers poll every 4 hours.
pub fn tier_interval(tier: i64) -> Duration {
    const HOUR: u64 = 60 * 60;
    match tier {
        1 => Duration::from_secs(HOUR),
        3 => Duration::from_secs(6 * HOUR),
        4 => Duration::from_secs(24 * HOUR),
        _ => Duration::from_secs(4 * HOUR),
    }
}

/// Whether `source` should be polled at `now` (Unix seconds).
pub fn is_due(source: &Source, now: i64) -> bool {
    match source.last_checked {
        None => true,
        Some(last) => now - last >= tier_interval(source.scrape_frequency).as_secs() as i64,
    }
}

/// Fetches one feed and keeps the items worth recording.
async fn scrape_feed(
    client: &reqwest::Client,
    source: &Source,
    cutoff: i64,
) -> Result<Vec<NewArticle>> {
    let bytes = fetch_feed(client, &source.url).await?;
    let items = parse_feed(&bytes)?;
    let total = items.len();

    let articles: Vec<NewArticle> = items
        .into_iter()
        .filter(|item| item.published_at.is_none_or(|published| published.timestamp() >= cutoff))
        .filter(|item| {
            let usable = validate_url(&item.link).is_ok();
            if !usable {
                tracing::debug!(feed_id = source.id, link = %item.link, "Skipping item without a usable link");
            }
            usable
        })
        .map(|item| NewArticle {
            source_id: source.id,
            url: item.link,
            title: item.title,
            publish_date: item.published_at.map(|published| published.timestamp()),
        })
        .collect();

    tracing::debug!(feed_id = source.id, total, kept = articles.len(), "Parsed feed");
    Ok(articles)
}

/// Feed scrape: select due feeds, fetch and parse them under the feed rate
/// limits, record new articles, stamp the attempted feeds and hand over to
/// enrichment.
pub(super) async fn run(ctx: &WorkflowContext, params: RunParams) -> Result<()> {
    let pipeline = ctx.pipeline();
    let settings = &pipeline.settings;
    let db = &pipeline.db;
    let client = &pipeline.client;
    let force = params.force;

    let sources: Vec<Source> = ctx
        .step("get feeds", &settings.database_policy, move || async move {
            let now = Utc::now().timestamp();
            let sources = db.list_sources().await?;
            anyhow::Ok(
                sources
                    .into_iter()
                    .filter(|source| force || is_due(source, now))
                    .collect::<Vec<_>>(),
            )
        })
        .await?;

    if sources.is_empty() {
        tracing::info!(run_id = %ctx.run_id(), "No feeds due");
        return Ok(());
    }
    tracing::info!(run_id = %ctx.run_id(), feeds = sources.len(), force, "Scraping feeds");

    let attempted: Vec<i64> = sources.iter().map(|source| source.id).collect();
    let cutoff = Utc::now().timestamp() - settings.max_feed_item_age.as_secs() as i64;

    let limiter = DomainRateLimiter::new(settings.feed_limiter);
    let per_feed: Vec<Vec<NewArticle>> = limiter
        .process_batch(sources, move |source, _domain| async move {
            let source = &source;
            let name = format!("scrape feed {}", source.id);
            match ctx
                .step(&name, &settings.feed_policy, move || scrape_feed(client, source, cutoff))
                .await
            {
                Ok(articles) => Ok(articles),
                Err(StepError::Exhausted { message, .. }) => {
                    tracing::warn!(
                        feed_id = source.id,
                        feed = %source.url,
                        error = %message,
                        "Feed failed after retries, treating as empty"
                    );
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            }
        })
        .await;

    let articles: Vec<NewArticle> = per_feed.into_iter().flatten().collect();
    let articles = &articles;
    let inserted: u64 = ctx
        .step("insert new articles", &settings.database_policy, move || async move {
            db.insert_articles(articles).await
        })
        .await?;
    tracing::info!(
        run_id = %ctx.run_id(),
        candidates = articles.len(),
        inserted,
        "Recorded new articles"
    );

    let attempted = &attempted;
    ctx.step("update sources", &settings.database_policy, move || async move {
        db.mark_sources_checked(attempted, Utc::now().timestamp()).await
    })
    .await?;

    let follow_up: String = ctx
        .step("trigger article processor", &settings.database_policy, move || async move {
            ctx.enqueue(WorkflowKind::ProcessArticles, RunParams::default()).await
        })
        .await?;
    tracing::debug!(run_id = %ctx.run_id(), follow_up = %follow_up, "Enrichment triggered");

    Ok(())
}
