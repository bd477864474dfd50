use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::Source;

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Register a feed, or update its name and tier if the URL is known.
    /// Returns the source id.
    pub async fn add_source(&self, url: &str, name: &str, scrape_frequency: i64) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO sources (url, name, scrape_frequency) VALUES (?, ?, ?) \
             ON CONFLICT(url) DO UPDATE SET name = excluded.name, \
             scrape_frequency = excluded.scrape_frequency \
             RETURNING id",
        )
        .bind(url)
        .bind(name)
        .bind(scrape_frequency)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// All registered sources, oldest first.
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT id, url, name, scrape_frequency, last_checked FROM sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(
            "SELECT id, url, name, scrape_frequency, last_checked FROM sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    /// Stamp `last_checked` on every given source. Returns the number of rows updated.
    pub async fn mark_sources_checked(&self, ids: &[i64], checked_at: i64) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        // 500 ids per statement stays under SQLite's bound-parameter limit
        const BATCH_SIZE: usize = 500;
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE sources SET last_checked = ");
            builder.push_bind(checked_at);
            builder.push(" WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            updated += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }
}
