use anyhow::Result;

use super::schema::Database;
use super::types::{RunStatus, WorkflowRunRow};

const RUN_COLUMNS: &str = "id, kind, status, params, error, created_at, updated_at";

impl Database {
    // ========================================================================
    // Workflow Runs
    // ========================================================================

    pub async fn insert_run(&self, id: &str, kind: &str, params: &str, now: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_runs (id, kind, status, params, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(kind)
        .bind(RunStatus::Pending.as_str())
        .bind(params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically moves the oldest pending run to `running` and returns it.
    pub async fn claim_next_run(&self, now: i64) -> Result<Option<WorkflowRunRow>> {
        let run = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "UPDATE workflow_runs SET status = 'running', updated_at = ? \
             WHERE id = (SELECT id FROM workflow_runs WHERE status = 'pending' \
                         ORDER BY created_at, rowid LIMIT 1) \
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    pub async fn finish_run(
        &self,
        id: &str,
        status: RunStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE workflow_runs SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns runs left `running` by a previous process to `pending`.
    pub async fn requeue_interrupted_runs(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = 'pending', updated_at = ? WHERE status = 'running'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<WorkflowRunRow>> {
        let run = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// All runs, oldest first.
    pub async fn list_runs(&self) -> Result<Vec<WorkflowRunRow>> {
        let runs = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs ORDER BY created_at, rowid"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Deletes completed and failed runs last touched before `older_than`,
    /// along with their step logs. Pending and running runs are never pruned.
    pub async fn prune_finished_runs(&self, older_than: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM workflow_runs WHERE status IN ('completed', 'failed') AND updated_at < ?",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Step Log
    // ========================================================================

    /// Serialized output of a completed step, if any.
    pub async fn load_step(&self, run_id: &str, name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT output FROM workflow_steps WHERE run_id = ? AND name = ?")
                .bind(run_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(output,)| output))
    }

    /// Record a completed step. The first recorded output wins.
    pub async fn save_step(&self, run_id: &str, name: &str, output: &str, now: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO workflow_steps (run_id, name, output, completed_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(name)
        .bind(output)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Names of completed steps for a run, in completion order.
    pub async fn step_names(&self, run_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM workflow_steps WHERE run_id = ? ORDER BY completed_at, rowid",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
