use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::policy::{execute, StepError, StepPolicy};
use super::{enrich, scrape, Pipeline};
use crate::storage::RunStatus;

/// How long finished runs and their step logs are kept.
pub const RUN_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    ScrapeFeeds,
    ProcessArticles,
}

impl WorkflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::ScrapeFeeds => "scrape_feeds",
            WorkflowKind::ProcessArticles => "process_articles",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scrape_feeds" => Some(WorkflowKind::ScrapeFeeds),
            "process_articles" => Some(WorkflowKind::ProcessArticles),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Scrape every feed regardless of its tier interval.
    #[serde(default)]
    pub force: bool,
}

/// Outcome of one executed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub kind: String,
    pub status: RunStatus,
    pub error: Option<String>,
}

struct Inner {
    pipeline: Pipeline,
    wake: Notify,
}

/// Durable job queue and executor for the ingestion workflows.
///
/// Runs live in the `workflow_runs` table and execute one at a time per
/// worker. Each named step's output is written to the step log before the
/// run moves on, so a run interrupted by a restart replays its completed
/// steps instead of repeating them.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                wake: Notify::new(),
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Queues a run and wakes the worker. Returns the run id.
    pub async fn enqueue(&self, kind: WorkflowKind, params: RunParams) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let params_json = serde_json::to_string(&params)?;
        self.inner
            .pipeline
            .db
            .insert_run(&id, kind.as_str(), &params_json, Utc::now().timestamp())
            .await
            .context("Failed to enqueue workflow run")?;
        self.inner.wake.notify_one();
        tracing::info!(run_id = %id, kind = kind.as_str(), force = params.force, "Workflow run queued");
        Ok(id)
    }

    /// Puts runs left `running` by a previous process back in the queue.
    pub async fn resume_interrupted(&self) -> Result<u64> {
        let resumed = self
            .inner
            .pipeline
            .db
            .requeue_interrupted_runs(Utc::now().timestamp())
            .await?;
        if resumed > 0 {
            tracing::info!(count = resumed, "Resuming interrupted workflow runs");
            self.inner.wake.notify_one();
        }
        Ok(resumed)
    }

    /// Deletes completed and failed runs older than `retention`.
    pub async fn prune_finished(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - retention.as_secs() as i64;
        let pruned = self.inner.pipeline.db.prune_finished_runs(cutoff).await?;
        if pruned > 0 {
            tracing::info!(count = pruned, "Pruned finished workflow runs");
        }
        Ok(pruned)
    }

    /// Claims and executes the oldest pending run, if any.
    ///
    /// A failing run is recorded as `failed`; only queue-level database
    /// errors are returned.
    pub async fn run_next(&self) -> Result<Option<RunReport>> {
        let db = &self.inner.pipeline.db;
        let Some(row) = db.claim_next_run(Utc::now().timestamp()).await? else {
            return Ok(None);
        };

        let outcome = match WorkflowKind::parse(&row.kind) {
            Some(kind) => {
                let params: RunParams = serde_json::from_str(&row.params).unwrap_or_else(|e| {
                    tracing::warn!(run_id = %row.id, error = %e, "Unreadable run params, using defaults");
                    RunParams::default()
                });
                let ctx = WorkflowContext {
                    engine: self.clone(),
                    run_id: row.id.clone(),
                };
                tracing::info!(run_id = %row.id, kind = %row.kind, "Workflow run started");
                match kind {
                    WorkflowKind::ScrapeFeeds => scrape::run(&ctx, params).await,
                    WorkflowKind::ProcessArticles => enrich::run(&ctx).await,
                }
            }
            None => Err(anyhow::anyhow!("Unknown workflow kind '{}'", row.kind)),
        };

        let (status, error) = match outcome {
            Ok(()) => {
                tracing::info!(run_id = %row.id, kind = %row.kind, "Workflow run completed");
                (RunStatus::Completed, None)
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(run_id = %row.id, kind = %row.kind, error = %message, "Workflow run failed");
                (RunStatus::Failed, Some(message))
            }
        };
        db.finish_run(&row.id, status, error.as_deref(), Utc::now().timestamp())
            .await?;

        Ok(Some(RunReport {
            run_id: row.id,
            kind: row.kind,
            status,
            error,
        }))
    }

    /// Executes pending runs, including runs they enqueue, until the queue
    /// is empty.
    pub async fn drain(&self) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();
        while let Some(report) = self.run_next().await? {
            reports.push(report);
        }
        Ok(reports)
    }

    /// Worker loop: executes runs as they are queued, checking at least
    /// every `poll`.
    pub async fn run_worker(&self, poll: Duration) {
        loop {
            match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => tracing::error!(error = %format!("{e:#}"), "Workflow worker error"),
            }
            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Enqueues a non-forced feed scrape every `every`, starting now. Each
    /// tick first prunes runs that finished more than [`RUN_RETENTION`] ago.
    pub fn spawn_scheduler(&self, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.prune_finished(RUN_RETENTION).await {
                    tracing::warn!(error = %format!("{e:#}"), "Pruning finished workflow runs failed");
                }
                if let Err(e) = engine
                    .enqueue(WorkflowKind::ScrapeFeeds, RunParams::default())
                    .await
                {
                    tracing::error!(error = %format!("{e:#}"), "Scheduled scrape could not be queued");
                }
            }
        })
    }
}

/// Handle given to a running workflow for executing logged steps.
pub struct WorkflowContext {
    engine: Engine,
    run_id: String,
}

impl WorkflowContext {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.engine.pipeline()
    }

    pub async fn enqueue(&self, kind: WorkflowKind, params: RunParams) -> Result<String> {
        self.engine.enqueue(kind, params).await
    }

    /// Runs the step `name` under `policy`, or returns its logged output if
    /// this run already completed it.
    pub async fn step<T, F, Fut>(&self, name: &str, policy: &StepPolicy, f: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let db = &self.pipeline().db;
        let logged = db
            .load_step(&self.run_id, name)
            .await
            .map_err(|e| StepError::Storage {
                step: name.to_string(),
                message: format!("{e:#}"),
            })?;
        if let Some(output) = logged {
            tracing::debug!(run_id = %self.run_id, step = %name, "Replaying logged step");
            return serde_json::from_str(&output).map_err(|e| StepError::Serialization {
                step: name.to_string(),
                message: e.to_string(),
            });
        }

        let value = execute(name, policy, f).await?;

        let output = serde_json::to_string(&value).map_err(|e| StepError::Serialization {
            step: name.to_string(),
            message: e.to_string(),
        })?;
        db.save_step(&self.run_id, name, &output, Utc::now().timestamp())
            .await
            .map_err(|e| StepError::Storage {
                step: name.to_string(),
                message: format!("{e:#}"),
            })?;
        tracing::debug!(run_id = %self.run_id, step = %name, "Step completed");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ArticleAnalysis, ClassifyError, Classifier};
    use crate::content::{ArticleFetcher, DisabledRenderer};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NeverCalled;

    #[async_trait]
    impl Classifier for NeverCalled {
        async fn classify(&self, _title: &str, _body: &str) -> Result<ArticleAnalysis, ClassifyError> {
            Err(ClassifyError::Timeout)
        }
    }

    async fn engine() -> Engine {
        let db = Database::open(":memory:").await.unwrap();
        let client = reqwest::Client::new();
        let articles = ArticleFetcher::new(client.clone(), Arc::new(DisabledRenderer));
        Engine::new(Pipeline::new(db, client, articles, Arc::new(NeverCalled)))
    }

    async fn context(engine: &Engine) -> WorkflowContext {
        let id = engine
            .enqueue(WorkflowKind::ScrapeFeeds, RunParams::default())
            .await
            .unwrap();
        WorkflowContext {
            engine: engine.clone(),
            run_id: id,
        }
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [WorkflowKind::ScrapeFeeds, WorkflowKind::ProcessArticles] {
            assert_eq!(WorkflowKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(WorkflowKind::parse("report"), None);
    }

    #[tokio::test]
    async fn test_step_output_replays_from_log() {
        let engine = engine().await;
        let ctx = context(&engine).await;
        let calls = &AtomicU32::new(0);

        let first: Vec<i64> = ctx
            .step("get feeds", &StepPolicy::ONCE, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(vec![1, 2, 3])
            })
            .await
            .unwrap();
        let replayed: Vec<i64> = ctx
            .step("get feeds", &StepPolicy::ONCE, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(vec![9])
            })
            .await
            .unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(replayed, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.pipeline().db.step_names(ctx.run_id()).await.unwrap(),
            vec!["get feeds".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_step_is_not_logged() {
        let engine = engine().await;
        let ctx = context(&engine).await;

        let err = ctx
            .step("update sources", &StepPolicy::ONCE, || async {
                Err::<u64, _>(anyhow::anyhow!("disk full"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Exhausted { attempts: 1, .. }));
        assert!(engine
            .pipeline()
            .db
            .load_step(ctx.run_id(), "update sources")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scrape_with_no_sources_completes() {
        let engine = engine().await;
        let id = engine
            .enqueue(WorkflowKind::ScrapeFeeds, RunParams { force: true })
            .await
            .unwrap();

        let reports = engine.drain().await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].run_id, id);
        assert_eq!(reports[0].status, RunStatus::Completed);
        let row = engine.pipeline().db.get_run(&id).await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.params, r#"{"force":true}"#);
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_run() {
        let engine = engine().await;
        engine
            .pipeline()
            .db
            .insert_run("legacy-1", "generate_report", "{}", 1)
            .await
            .unwrap();

        let report = engine.run_next().await.unwrap().unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("generate_report"));
        assert!(engine.run_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes() {
        let engine = engine().await;
        let db = &engine.pipeline().db;
        db.insert_run("crashed", "process_articles", "{}", 1).await.unwrap();
        db.claim_next_run(2).await.unwrap();
        assert!(engine.run_next().await.unwrap().is_none());

        assert_eq!(engine.resume_interrupted().await.unwrap(), 1);
        let report = engine.run_next().await.unwrap().unwrap();

        assert_eq!(report.run_id, "crashed");
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_prune_finished_keeps_recent_and_open_runs() {
        let engine = engine().await;
        let db = &engine.pipeline().db;
        let now = Utc::now().timestamp();
        db.insert_run("ancient", "scrape_feeds", "{}", 1).await.unwrap();
        db.finish_run("ancient", RunStatus::Completed, None, 1).await.unwrap();
        db.insert_run("stale-pending", "scrape_feeds", "{}", 1).await.unwrap();
        db.insert_run("fresh", "scrape_feeds", "{}", now).await.unwrap();
        db.finish_run("fresh", RunStatus::Completed, None, now).await.unwrap();

        assert_eq!(engine.prune_finished(RUN_RETENTION).await.unwrap(), 1);

        let ids: Vec<String> = db.list_runs().await.unwrap().into_iter().map(|run| run.id).collect();
        assert_eq!(ids, vec!["stale-pending", "fresh"]);
    }

    #[tokio::test]
    async fn test_scheduler_tick_prunes_then_queues_scrape() {
        let engine = engine().await;
        let db = &engine.pipeline().db;
        db.insert_run("ancient", "process_articles", "{}", 1).await.unwrap();
        db.finish_run("ancient", RunStatus::Failed, Some("boom"), 1).await.unwrap();

        let handle = engine.spawn_scheduler(Duration::from_secs(3600));
        let runs = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let runs = db.list_runs().await.unwrap();
                if runs.iter().any(|run| run.kind == "scrape_feeds") {
                    return runs;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "pending");
    }
}
