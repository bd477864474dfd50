use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, Enrichment, NewArticle, PendingArticle};

const ARTICLE_COLUMNS: &str = "id, title, url, publish_date, content, language, location, \
     completeness, relevance, summary, fail_reason, source_id, processed_at, created_at";

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Record new articles, skipping any whose URL is already stored.
    /// Returns the number of rows actually inserted.
    ///
    /// Batches of 100 keep us under SQLite's parameter limit (5 columns * 100 = 500).
    pub async fn insert_articles(&self, articles: &[NewArticle]) -> Result<u64> {
        if articles.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 100;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (source_id, url, title, publish_date, created_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.source_id)
                    .push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(article.publish_date)
                    .push_bind(now);
            });

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Unprocessed articles published at or after `published_after`, in random
    /// order, at most `limit`. Articles without a publish date never qualify.
    pub async fn unprocessed_articles(
        &self,
        published_after: i64,
        limit: i64,
    ) -> Result<Vec<PendingArticle>> {
        let articles = sqlx::query_as::<_, PendingArticle>(
            "SELECT id, url, title, publish_date FROM articles \
             WHERE processed_at IS NULL AND fail_reason IS NULL AND publish_date >= ? \
             ORDER BY RANDOM() LIMIT ?",
        )
        .bind(published_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Terminally mark an article as failed. Returns false when the article
    /// was already processed (or does not exist).
    pub async fn mark_article_failed(&self, id: i64, reason: &str, processed_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE articles SET fail_reason = ?, processed_at = ? \
             WHERE id = ? AND processed_at IS NULL",
        )
        .bind(reason)
        .bind(processed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist classification output and mark the article processed.
    /// Returns false when the article was already processed (or does not exist).
    pub async fn record_enrichment(
        &self,
        id: i64,
        enrichment: &Enrichment,
        processed_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE articles SET title = ?, content = ?, language = ?, location = ?, completeness = ?, \
             relevance = ?, summary = ?, processed_at = ? \
             WHERE id = ? AND processed_at IS NULL",
        )
        .bind(&enrichment.title)
        .bind(&enrichment.content)
        .bind(&enrichment.language)
        .bind(&enrichment.location)
        .bind(&enrichment.completeness)
        .bind(&enrichment.relevance)
        .bind(&enrichment.summary)
        .bind(processed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    /// All articles for a source, newest first.
    pub async fn articles_for_source(&self, source_id: i64) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE source_id = ? \
             ORDER BY publish_date DESC, id DESC"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db_with_source() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let source_id = db.add_source("https://wire.example/rss", "Wire", 2).await.unwrap();
        (db, source_id)
    }

    fn new_article(source_id: i64, slug: &str, publish_date: Option<i64>) -> NewArticle {
        NewArticle {
            source_id,
            url: format!("https://wire.example/{slug}"),
            title: format!("Story {slug}"),
            publish_date,
        }
    }

    #[tokio::test]
    async fn test_insert_articles_ignores_duplicate_urls() {
        let (db, source_id) = test_db_with_source().await;
        let batch = vec![
            new_article(source_id, "a", Some(100)),
            new_article(source_id, "b", Some(100)),
            new_article(source_id, "a", Some(200)),
        ];

        assert_eq!(db.insert_articles(&batch).await.unwrap(), 2);
        assert_eq!(db.insert_articles(&batch).await.unwrap(), 0);
        assert_eq!(db.count_articles().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_large_batch_spans_chunks() {
        let (db, source_id) = test_db_with_source().await;
        let batch: Vec<NewArticle> = (0..250)
            .map(|i| new_article(source_id, &i.to_string(), Some(i)))
            .collect();
        assert_eq!(db.insert_articles(&batch).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_unprocessed_articles_filters_window_and_null_dates() {
        let (db, source_id) = test_db_with_source().await;
        db.insert_articles(&[
            new_article(source_id, "old", Some(1_000)),
            new_article(source_id, "fresh", Some(5_000)),
            new_article(source_id, "undated", None),
        ])
        .await
        .unwrap();

        let pending = db.unprocessed_articles(2_000, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://wire.example/fresh");
    }

    #[tokio::test]
    async fn test_unprocessed_articles_respects_limit() {
        let (db, source_id) = test_db_with_source().await;
        let batch: Vec<NewArticle> = (0..20)
            .map(|i| new_article(source_id, &i.to_string(), Some(10_000)))
            .collect();
        db.insert_articles(&batch).await.unwrap();

        assert_eq!(db.unprocessed_articles(0, 5).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_mark_failed_is_terminal() {
        let (db, source_id) = test_db_with_source().await;
        db.insert_articles(&[new_article(source_id, "x", Some(10_000))])
            .await
            .unwrap();
        let id = db.unprocessed_articles(0, 1).await.unwrap()[0].id;

        assert!(db.mark_article_failed(id, "unsupported format", 20_000).await.unwrap());
        assert!(!db.mark_article_failed(id, "again", 30_000).await.unwrap());

        let article = db.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.fail_reason.as_deref(), Some("unsupported format"));
        assert_eq!(article.processed_at, Some(20_000));
        assert!(!article.is_enriched());
        assert!(db.unprocessed_articles(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_enrichment_sets_fields_once() {
        let (db, source_id) = test_db_with_source().await;
        db.insert_articles(&[new_article(source_id, "x", Some(10_000))])
            .await
            .unwrap();
        let id = db.unprocessed_articles(0, 1).await.unwrap()[0].id;

        let enrichment = Enrichment {
            title: "Story x, extracted".into(),
            content: "Body".into(),
            language: "en".into(),
            location: "Paris".into(),
            completeness: "COMPLETE".into(),
            relevance: "RELEVANT".into(),
            summary: Some("HEADLINE: x".into()),
        };
        assert!(db.record_enrichment(id, &enrichment, 20_000).await.unwrap());
        assert!(!db.mark_article_failed(id, "late failure", 30_000).await.unwrap());

        let article = db.get_article(id).await.unwrap().unwrap();
        assert!(article.is_enriched());
        assert_eq!(article.title, "Story x, extracted");
        assert_eq!(article.language.as_deref(), Some("en"));
        assert_eq!(article.completeness.as_deref(), Some("COMPLETE"));
        assert_eq!(article.processed_at, Some(20_000));
    }

    #[tokio::test]
    async fn test_get_article_by_url() {
        let (db, source_id) = test_db_with_source().await;
        db.insert_articles(&[new_article(source_id, "x", None)])
            .await
            .unwrap();
        let article = db
            .get_article_by_url("https://wire.example/x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.title, "Story x");
        assert_eq!(article.source_id, source_id);
        assert_eq!(db.articles_for_source(source_id).await.unwrap().len(), 1);
    }
}
