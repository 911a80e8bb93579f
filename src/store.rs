use crate::types::{
    Article, ArticleAnalysis, ResearchError, Result, SearchParameters, Session, SessionStatus,
    UpdateRecord,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Fields that cannot be changed through the patch interface.
const IMMUTABLE_FIELDS: &[&str] = &["id", "query", "config", "created_at", "update_history"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub modified_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStats {
    pub sessions_removed: usize,
    pub articles_removed: usize,
}

/// Persistence boundary for sessions and articles. Injected into the
/// aggregator and summarizer so tests can substitute an in-memory fake.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, query: &str, config: SearchParameters) -> Result<Uuid>;

    /// Apply a field patch to a session, appending an update-history entry
    /// that captures the pre-patch value of every patched key.
    async fn update_session(&self, id: Uuid, patch: Map<String, Value>) -> Result<UpdateOutcome>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Bulk insert, returns the number persisted.
    async fn save_articles(&self, session_id: Uuid, articles: Vec<Article>) -> Result<usize>;

    async fn get_articles(&self, session_id: Uuid) -> Result<Vec<Article>>;

    async fn update_article_summary(
        &self,
        session_id: Uuid,
        article_id: Uuid,
        analysis: ArticleAnalysis,
    ) -> Result<()>;

    /// Retention cleanup: drop sessions older than `days_old` along with
    /// their articles.
    async fn cleanup_old_sessions(&self, days_old: i64) -> Result<CleanupStats>;
}

/// Validate and apply a patch against a session document, producing the
/// updated session and the outcome. Shared by both store implementations.
fn apply_patch(session: &Session, patch: &Map<String, Value>) -> Result<(Session, UpdateOutcome)> {
    if patch.is_empty() {
        return Err(ResearchError::InvalidArgument(
            "update patch cannot be empty".to_string(),
        ));
    }

    for key in patch.keys() {
        if IMMUTABLE_FIELDS.contains(&key.as_str()) {
            return Err(ResearchError::InvalidArgument(format!(
                "field '{}' is immutable",
                key
            )));
        }
    }

    if let Some(status_value) = patch.get("status") {
        let next: SessionStatus = serde_json::from_value(status_value.clone())?;
        if next != session.status && !session.status.can_transition(next) {
            return Err(ResearchError::InvalidArgument(format!(
                "illegal status transition {:?} -> {:?}",
                session.status, next
            )));
        }
    }

    let Value::Object(mut doc) = serde_json::to_value(session)? else {
        return Err(ResearchError::InvalidArgument(
            "session did not serialize to an object".to_string(),
        ));
    };

    let mut previous_values = Map::new();
    let mut modified_count = 0;
    for (key, value) in patch {
        let previous = doc.get(key).cloned().unwrap_or(Value::Null);
        if previous != *value {
            modified_count += 1;
        }
        previous_values.insert(key.clone(), previous);
        doc.insert(key.clone(), value.clone());
    }

    let mut updated: Session = serde_json::from_value(Value::Object(doc))?;
    updated.update_history.push(UpdateRecord {
        timestamp: Utc::now(),
        modified_fields: patch.keys().cloned().collect(),
        previous_values,
    });

    Ok((
        updated,
        UpdateOutcome {
            success: modified_count > 0,
            modified_count,
        },
    ))
}

/// In-memory store used in tests and as the fallback when no database is
/// configured.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    articles: RwLock<HashMap<Uuid, Vec<Article>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, query: &str, config: SearchParameters) -> Result<Uuid> {
        let session = Session::new(query, config);
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        info!("Created research session: {}", id);
        Ok(id)
    }

    async fn update_session(&self, id: Uuid, patch: Map<String, Value>) -> Result<UpdateOutcome> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(&id)
            .ok_or(ResearchError::SessionNotFound(id))?;
        let (updated, outcome) = apply_patch(session, &patch)?;
        sessions.insert(id, updated);
        Ok(outcome)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn save_articles(&self, session_id: Uuid, articles: Vec<Article>) -> Result<usize> {
        if !self.sessions.read().await.contains_key(&session_id) {
            return Err(ResearchError::SessionNotFound(session_id));
        }
        let count = articles.len();
        self.articles
            .write()
            .await
            .entry(session_id)
            .or_default()
            .extend(articles);
        info!("Saved {} articles for session {}", count, session_id);
        Ok(count)
    }

    async fn get_articles(&self, session_id: Uuid) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_article_summary(
        &self,
        session_id: Uuid,
        article_id: Uuid,
        analysis: ArticleAnalysis,
    ) -> Result<()> {
        let mut articles = self.articles.write().await;
        let list = articles
            .get_mut(&session_id)
            .ok_or(ResearchError::SessionNotFound(session_id))?;
        let article = list
            .iter_mut()
            .find(|a| a.id == article_id)
            .ok_or_else(|| {
                ResearchError::InvalidArgument(format!("article {} not found", article_id))
            })?;
        article.score = analysis.relevance;
        article.summary = Some(analysis);
        article.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn cleanup_old_sessions(&self, days_old: i64) -> Result<CleanupStats> {
        let cutoff = Utc::now() - Duration::days(days_old);
        let mut sessions = self.sessions.write().await;
        let mut articles = self.articles.write().await;

        let stale: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.created_at < cutoff)
            .map(|s| s.id)
            .collect();

        let mut articles_removed = 0;
        for id in &stale {
            sessions.remove(id);
            if let Some(removed) = articles.remove(id) {
                articles_removed += removed.len();
            }
        }

        info!(
            "Cleanup removed {} sessions and {} articles older than {} days",
            stale.len(),
            articles_removed,
            days_old
        );
        Ok(CleanupStats {
            sessions_removed: stale.len(),
            articles_removed,
        })
    }
}

/// Postgres-backed store. Sessions and articles are kept as jsonb
/// documents, matching the document shape the pipeline works with.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_sessions (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_articles (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_research_articles_session ON research_articles (session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT data FROM research_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn write_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO research_sessions (id, created_at, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(session.id)
        .bind(session.created_at)
        .bind(serde_json::to_value(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, query: &str, config: SearchParameters) -> Result<Uuid> {
        let session = Session::new(query, config);
        self.write_session(&session).await?;
        info!("Created research session: {}", session.id);
        Ok(session.id)
    }

    async fn update_session(&self, id: Uuid, patch: Map<String, Value>) -> Result<UpdateOutcome> {
        let session = self
            .load_session(id)
            .await?
            .ok_or(ResearchError::SessionNotFound(id))?;
        let (updated, outcome) = apply_patch(&session, &patch)?;
        self.write_session(&updated).await?;
        Ok(outcome)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        self.load_session(id).await
    }

    async fn save_articles(&self, session_id: Uuid, articles: Vec<Article>) -> Result<usize> {
        if self.load_session(session_id).await?.is_none() {
            return Err(ResearchError::SessionNotFound(session_id));
        }

        let mut count = 0;
        for article in &articles {
            sqlx::query(
                r#"
                INSERT INTO research_articles (id, session_id, created_at, data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(article.id)
            .bind(session_id)
            .bind(Utc::now())
            .bind(serde_json::to_value(article)?)
            .execute(&self.pool)
            .await?;
            count += 1;
        }

        info!("Saved {} articles for session {}", count, session_id);
        Ok(count)
    }

    async fn get_articles(&self, session_id: Uuid) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT data FROM research_articles WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut articles = Vec::with_capacity(rows.len());
        for row in rows {
            let data: Value = row.try_get("data")?;
            articles.push(serde_json::from_value(data)?);
        }
        Ok(articles)
    }

    async fn update_article_summary(
        &self,
        session_id: Uuid,
        article_id: Uuid,
        analysis: ArticleAnalysis,
    ) -> Result<()> {
        let row = sqlx::query(
            "SELECT data FROM research_articles WHERE id = $1 AND session_id = $2",
        )
        .bind(article_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ResearchError::InvalidArgument(format!("article {} not found", article_id))
        })?;

        let data: Value = row.try_get("data")?;
        let mut article: Article = serde_json::from_value(data)?;
        article.score = analysis.relevance;
        article.summary = Some(analysis);
        article.processed_at = Some(Utc::now());

        sqlx::query("UPDATE research_articles SET data = $1 WHERE id = $2")
            .bind(serde_json::to_value(&article)?)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup_old_sessions(&self, days_old: i64) -> Result<CleanupStats> {
        let cutoff = Utc::now() - Duration::days(days_old);

        let articles = sqlx::query(
            r#"
            DELETE FROM research_articles
            WHERE session_id IN (SELECT id FROM research_sessions WHERE created_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let sessions = sqlx::query("DELETE FROM research_sessions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let stats = CleanupStats {
            sessions_removed: sessions.rows_affected() as usize,
            articles_removed: articles.rows_affected() as usize,
        };
        if stats.sessions_removed > 0 {
            info!(
                "Cleanup removed {} sessions and {} articles",
                stats.sessions_removed, stats.articles_removed
            );
        } else {
            warn!("Cleanup found no sessions older than {} days", days_old);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("test query", SearchParameters::default())
    }

    #[test]
    fn patch_rejects_empty_map() {
        let err = apply_patch(&session(), &Map::new()).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidArgument(_)));
    }

    #[test]
    fn patch_rejects_immutable_fields() {
        let mut patch = Map::new();
        patch.insert("query".to_string(), json!("other"));
        assert!(apply_patch(&session(), &patch).is_err());
    }

    #[test]
    fn patch_records_previous_values() {
        let mut patch = Map::new();
        patch.insert("status".to_string(), json!("searching"));
        patch.insert("results_found".to_string(), json!(7));

        let (updated, outcome) = apply_patch(&session(), &patch).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.modified_count, 2);
        assert_eq!(updated.status, SessionStatus::Searching);
        assert_eq!(updated.results_found, 7);

        let record = updated.update_history.last().unwrap();
        assert_eq!(record.previous_values["status"], json!("initialized"));
        assert_eq!(record.previous_values["results_found"], json!(0));
    }

    #[test]
    fn patch_rejects_status_regression() {
        let mut s = session();
        s.status = SessionStatus::Completed;

        let mut patch = Map::new();
        patch.insert("status".to_string(), json!("searching"));
        let err = apply_patch(&s, &patch).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidArgument(_)));
    }

    #[test]
    fn patch_allows_adhoc_fields() {
        let mut patch = Map::new();
        patch.insert("processed_count".to_string(), json!(3));

        let (updated, outcome) = apply_patch(&session(), &patch).unwrap();
        assert!(outcome.success);
        assert_eq!(updated.extra["processed_count"], json!(3));
        let record = updated.update_history.last().unwrap();
        assert_eq!(record.previous_values["processed_count"], Value::Null);
    }

    #[test]
    fn unchanged_patch_reports_no_modification() {
        let mut patch = Map::new();
        patch.insert("results_found".to_string(), json!(0));
        let (_, outcome) = apply_patch(&session(), &patch).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.modified_count, 0);
    }
}
