use crate::llm::SummaryModel;
use crate::store::SessionStore;
use crate::types::{Article, ArticleAnalysis, ResearchError, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Explicit retry policy for article analysis: linear backoff, attempt n
/// waits `delay * n`. Passed in rather than wrapped around the call so
/// tests control attempt counts deterministically.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedArticle {
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ProcessingReport {
    pub total: usize,
    pub processed: usize,
    pub failed: Vec<FailedArticle>,
    pub success_rate: f64,
}

/// Runs structured summarization over a session's articles with bounded
/// concurrency. Per-article failures are collected, never fatal to the
/// batch.
pub struct ArticleSummarizer {
    model: Arc<dyn SummaryModel>,
    store: Arc<dyn SessionStore>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl ArticleSummarizer {
    pub fn new(model: Arc<dyn SummaryModel>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            model,
            store,
            retry: RetryPolicy::default(),
            concurrency: 3,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Analyze every article in the session and fold the summaries back
    /// into the stored articles. Progress and the final outcome are
    /// recorded on the session; session status is left untouched.
    pub async fn process_session(&self, session_id: Uuid) -> Result<ProcessingReport> {
        let articles = self.store.get_articles(session_id).await?;
        if articles.is_empty() {
            return Err(ResearchError::Processing(
                "no articles found in session".to_string(),
            ));
        }

        let total = articles.len();
        info!("Processing {} articles for session {}", total, session_id);

        let mut results = stream::iter(articles.into_iter().map(|article| {
            let model = Arc::clone(&self.model);
            let retry = self.retry.clone();
            async move {
                let outcome = analyze_with_retry(model.as_ref(), &retry, &article).await;
                (article, outcome)
            }
        }))
        .buffer_unordered(self.concurrency);

        // Session updates are issued only from this collecting loop, so
        // persistence stays single-writer per session.
        let mut processed = 0usize;
        let mut failed: Vec<FailedArticle> = Vec::new();
        while let Some((article, outcome)) = results.next().await {
            match outcome {
                Ok(analysis) => {
                    self.store
                        .update_article_summary(session_id, article.id, analysis)
                        .await?;
                    processed += 1;

                    let mut patch = Map::new();
                    patch.insert("processed_count".to_string(), json!(processed));
                    patch.insert("total_count".to_string(), json!(total));
                    self.store.update_session(session_id, patch).await?;
                }
                Err(e) => {
                    warn!("Failed to process article '{}': {}", article.title, e);
                    failed.push(FailedArticle {
                        title: article.title,
                        error: e.to_string(),
                    });
                }
            }
        }

        let success_rate = processed as f64 / total as f64;
        let mut patch = Map::new();
        patch.insert("processed_count".to_string(), json!(processed));
        patch.insert("total_count".to_string(), json!(total));
        patch.insert("failed_articles".to_string(), serde_json::to_value(&failed)?);
        patch.insert("success_rate".to_string(), json!(success_rate));
        patch.insert(
            "processed_at".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        self.store.update_session(session_id, patch).await?;

        info!(
            "Session {}: processed {} articles, {} failed",
            session_id,
            processed,
            failed.len()
        );

        Ok(ProcessingReport {
            total,
            processed,
            failed,
            success_rate,
        })
    }
}

async fn analyze_with_retry(
    model: &dyn SummaryModel,
    retry: &RetryPolicy,
    article: &Article,
) -> Result<ArticleAnalysis> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match model.analyze(&article.title, &article.content).await {
            Ok(analysis) => return Ok(analysis),
            Err(e) => {
                if attempt >= retry.max_attempts {
                    return Err(e);
                }
                warn!(
                    "Attempt {} failed for '{}': {}. Retrying...",
                    attempt, article.title, e
                );
                tokio::time::sleep(retry.delay_for(attempt)).await;
            }
        }
    }
}
