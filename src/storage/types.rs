use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The database is locked by another process. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// A registered RSS feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: String,
    /// Scrape tier: 1 = hourly, 2 = every 4 hours (default), 3 = every 6 hours,
    /// 4 = daily. Any other value is treated as tier 2.
    pub scrape_frequency: i64,
    /// Unix seconds of the last scrape attempt, `None` if never scraped.
    pub last_checked: Option<i64>,
}

// ============================================================================
// Articles
// ============================================================================

/// A feed item about to be recorded as an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub publish_date: Option<i64>,
}

/// An article selected for enrichment.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct PendingArticle {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub publish_date: Option<i64>,
}

/// Classification output persisted for a successfully enriched article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Title as extracted from the article page.
    pub title: String,
    pub content: String,
    pub language: String,
    pub location: String,
    pub completeness: String,
    pub relevance: String,
    /// Four labeled lines; `None` when the classifier produced no summary.
    pub summary: Option<String>,
}

/// A stored article row.
///
/// `processed_at` is set exactly once, either alongside the enrichment
/// fields or alongside `fail_reason`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub publish_date: Option<i64>,
    pub content: Option<String>,
    pub language: Option<String>,
    pub location: Option<String>,
    pub completeness: Option<String>,
    pub relevance: Option<String>,
    pub summary: Option<String>,
    pub fail_reason: Option<String>,
    pub source_id: i64,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

impl Article {
    /// Processed without a failure reason.
    pub fn is_enriched(&self) -> bool {
        self.processed_at.is_some() && self.fail_reason.is_none()
    }
}

// ============================================================================
// Workflow Runs
// ============================================================================

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A persisted workflow run row. `kind` and `params` are interpreted by
/// the workflow engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowRunRow {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub params: String,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
