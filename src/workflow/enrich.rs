use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::engine::{RunParams, WorkflowContext, WorkflowKind};
use super::policy::StepError;
use crate::classify::ArticleSummary;
use crate::content::{ArticleContent, ArticleFetcher};
use crate::ratelimit::{DomainRateLimiter, RateLimited};
use crate::storage::{Enrichment, PendingArticle};
use crate::util::domain_of;

impl RateLimited for PendingArticle {
    fn url(&self) -> &str {
        &self.url
    }
}

/// Logged result of resolving one article's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum FetchOutcome {
    Fetched { content: ArticleContent },
    Failed { reason: String },
}

/// One attempt at resolving an article. Errors a retry cannot fix become a
/// `Failed` outcome immediately instead of consuming the retry budget.
async fn fetch_outcome(fetcher: &ArticleFetcher, url: &str, domain: &str) -> Result<FetchOutcome> {
    match fetcher.fetch_article(url, domain).await {
        Ok(content) => Ok(FetchOutcome::Fetched { content }),
        Err(e) if e.is_retryable() => Err(e.into()),
        Err(e) => Ok(FetchOutcome::Failed {
            reason: e.to_string(),
        }),
    }
}

async fn record_failure(ctx: &WorkflowContext, id: i64, reason: &str) -> Result<(), StepError> {
    let db = &ctx.pipeline().db;
    let name = format!("update db for failed article {id}");
    ctx.step(&name, &ctx.pipeline().settings.database_policy, move || async move {
        db.mark_article_failed(id, reason, Utc::now().timestamp()).await
    })
    .await?;
    Ok(())
}

/// Classifies one fetched article and records the result. Returns whether
/// the article was enriched (as opposed to marked failed).
async fn classify_and_store(
    ctx: &WorkflowContext,
    article: &PendingArticle,
    content: &ArticleContent,
) -> Result<bool, StepError> {
    let pipeline = ctx.pipeline();
    let settings = &pipeline.settings;
    let db = &pipeline.db;
    let classifier = pipeline.classifier.as_ref();
    let id = article.id;

    let analysis = ctx
        .step(
            &format!("analyze article {id}"),
            &settings.classify_policy,
            move || async move { anyhow::Ok(classifier.classify(&content.title, &content.text).await?) },
        )
        .await;

    let analysis = match analysis {
        Ok(analysis) => analysis,
        Err(StepError::Exhausted { message, .. }) => {
            tracing::warn!(article_id = id, url = %article.url, error = %message, "Classification failed");
            record_failure(ctx, id, &format!("classification failed: {message}")).await?;
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let enrichment = Enrichment {
        title: content.title.clone(),
        content: content.text.clone(),
        language: analysis.language,
        location: analysis.location,
        completeness: analysis.completeness.as_str().to_string(),
        relevance: analysis.relevance.as_str().to_string(),
        summary: analysis.summary.as_ref().map(ArticleSummary::to_plain_text),
    };
    let enrichment = &enrichment;
    ctx.step(
        &format!("update db for article {id}"),
        &settings.database_policy,
        move || async move { db.record_enrichment(id, enrichment, Utc::now().timestamp()).await },
    )
    .await?;

    Ok(true)
}

/// Article enrichment: select recent unprocessed articles, resolve their
/// text under the article rate limits, classify, record, and chain another
/// run while a backlog remains.
pub(super) async fn run(ctx: &WorkflowContext) -> Result<()> {
    let pipeline = ctx.pipeline();
    let settings = &pipeline.settings;
    let db = &pipeline.db;
    let fetcher = &pipeline.articles;
    let window = settings.enrichment_window.as_secs() as i64;
    let batch_size = settings.enrichment_batch_size;

    let pending: Vec<PendingArticle> = ctx
        .step("get articles", &settings.database_policy, move || async move {
            db.unprocessed_articles(Utc::now().timestamp() - window, batch_size)
                .await
        })
        .await?;

    if pending.is_empty() {
        tracing::info!(run_id = %ctx.run_id(), "No articles to process");
        return Ok(());
    }
    tracing::info!(run_id = %ctx.run_id(), articles = pending.len(), "Processing articles");

    let (routable, unroutable): (Vec<_>, Vec<_>) = pending
        .into_iter()
        .partition(|article| domain_of(&article.url).is_some());
    for article in &unroutable {
        tracing::warn!(article_id = article.id, url = %article.url, "Article URL has no host");
        record_failure(ctx, article.id, "invalid article url").await?;
    }

    let limiter = DomainRateLimiter::new(settings.article_limiter);
    let fetched: Vec<(PendingArticle, FetchOutcome)> = limiter
        .process_batch(routable, move |article, domain| async move {
            let name = format!("scrape article {}", article.id);
            let (url, domain) = (article.url.as_str(), domain.as_str());
            let outcome = match ctx
                .step(&name, &settings.article_policy, move || fetch_outcome(fetcher, url, domain))
                .await
            {
                Ok(outcome) => outcome,
                Err(StepError::Exhausted { message, .. }) => FetchOutcome::Failed { reason: message },
                Err(e) => return Err(e),
            };
            Ok((article, outcome))
        })
        .await;

    let mut successes = Vec::new();
    let mut failed = 0usize;
    for (article, outcome) in fetched {
        match outcome {
            FetchOutcome::Fetched { content } => successes.push((article, content)),
            FetchOutcome::Failed { reason } => {
                tracing::warn!(article_id = article.id, url = %article.url, reason = %reason, "Article fetch failed");
                record_failure(ctx, article.id, &reason).await?;
                failed += 1;
            }
        }
    }

    let mut enriched = 0usize;
    let outcomes = join_all(
        successes
            .iter()
            .map(|(article, content)| classify_and_store(ctx, article, content)),
    )
    .await;
    for outcome in outcomes {
        if outcome? {
            enriched += 1;
        } else {
            failed += 1;
        }
    }
    tracing::info!(run_id = %ctx.run_id(), enriched, failed, "Article batch processed");

    let sample = settings.backlog_sample;
    let remaining: usize = ctx
        .step("get remaining articles", &settings.database_policy, move || async move {
            let backlog = db
                .unprocessed_articles(Utc::now().timestamp() - window, sample)
                .await?;
            anyhow::Ok(backlog.len())
        })
        .await?;

    if remaining > 0 {
        let next: String = ctx
            .step("trigger article processor", &settings.database_policy, move || async move {
                ctx.enqueue(WorkflowKind::ProcessArticles, RunParams::default()).await
            })
            .await?;
        tracing::info!(run_id = %ctx.run_id(), remaining, next_run = %next, "Backlog remains, chaining another run");
    }

    Ok(())
}
