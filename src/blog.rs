use crate::llm::{BlogModel, BlogRequest};
use crate::store::SessionStore;
use crate::types::{Article, BlogPost, ResearchError, Result};
use chrono::NaiveDateTime;
use serde_json::{json, Map};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Assembles a blog post from a session's processed article summaries with
/// a single model call, then persists the result on the session.
pub struct BlogAssembler {
    model: Arc<dyn BlogModel>,
    store: Arc<dyn SessionStore>,
}

impl BlogAssembler {
    pub fn new(model: Arc<dyn BlogModel>, store: Arc<dyn SessionStore>) -> Self {
        Self { model, store }
    }

    pub async fn generate(&self, session_id: Uuid) -> Result<BlogPost> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(ResearchError::SessionNotFound(session_id))?;

        let articles = self.store.get_articles(session_id).await?;
        let processed: Vec<Article> = articles
            .into_iter()
            .filter(|a| a.summary.is_some())
            .collect();
        if processed.is_empty() {
            return Err(ResearchError::Processing(
                "session has no processed articles".to_string(),
            ));
        }

        let request = BlogRequest {
            topic: session.query.clone(),
            article_count: processed.len(),
            key_findings: extract_key_findings(&processed),
            statistics: collect_from_summaries(&processed, |s| &s.key_statistics, 3),
            practical_tips: collect_from_summaries(&processed, |s| &s.practical_tips, 3),
        };

        info!(
            "Generating blog post for session {} from {} processed articles",
            session_id, request.article_count
        );
        let post = self.model.compose(&request).await?;

        let mut patch = Map::new();
        patch.insert("blog_content".to_string(), serde_json::to_value(&post)?);
        patch.insert(
            "blog_generated_at".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        self.store.update_session(session_id, patch).await?;

        Ok(post)
    }
}

fn published_date(article: &Article) -> Option<String> {
    article
        .metadata
        .get("published_date")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn format_date(raw: &str) -> Option<String> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%B %d, %Y").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%a, %d %b %Y %H:%M:%S GMT") {
        return Some(dt.format("%B %d, %Y").to_string());
    }
    None
}

/// Pull main points from every summary, newest article first, tagging the
/// leading point of each article with its publication date when known.
/// Order-preserving dedup, capped at ten findings.
pub fn extract_key_findings(articles: &[Article]) -> Vec<String> {
    let mut sorted: Vec<&Article> = articles.iter().collect();
    sorted.sort_by(|a, b| {
        published_date(b)
            .unwrap_or_default()
            .cmp(&published_date(a).unwrap_or_default())
    });

    let mut findings = Vec::new();
    for article in sorted {
        let Some(summary) = &article.summary else {
            continue;
        };
        let mut points = summary.main_points.clone();
        if let Some(formatted) = published_date(article).as_deref().and_then(format_date) {
            if let Some(first) = points.first_mut() {
                *first = format!("As of {}: {}", formatted, first);
            }
        }
        findings.extend(points);
    }

    let mut seen = HashSet::new();
    findings.retain(|point| seen.insert(point.clone()));
    findings.truncate(10);
    findings
}

fn collect_from_summaries<F>(articles: &[Article], select: F, per_article: usize) -> Vec<String>
where
    F: Fn(&crate::types::ArticleAnalysis) -> &Vec<String>,
{
    articles
        .iter()
        .filter_map(|a| a.summary.as_ref())
        .flat_map(|s| select(s).iter().take(per_article).cloned())
        .collect()
}
