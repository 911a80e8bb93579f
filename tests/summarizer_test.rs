use async_trait::async_trait;
use research_aggregator::{
    Article, ArticleAnalysis, ArticleSummarizer, BlogAssembler, BlogModel, BlogPost, BlogRequest,
    BlogSection, MemoryStore, ResearchError, Result as ResearchResult, RetryPolicy,
    SearchParameters, SearchResult, SessionStatus, SessionStore, SummaryModel,
};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Model fake that fails a configured number of times per title before
/// returning an analysis, counting every attempt.
struct FlakyModel {
    failures_before_success: HashMap<String, u32>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FlakyModel {
    fn new(failures: &[(&str, u32)]) -> Self {
        Self {
            failures_before_success: failures
                .iter()
                .map(|(title, n)| (title.to_string(), *n))
                .collect(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts_for(&self, title: &str) -> u32 {
        *self.attempts.lock().unwrap().get(title).unwrap_or(&0)
    }
}

#[async_trait]
impl SummaryModel for FlakyModel {
    async fn analyze(&self, title: &str, _content: &str) -> ResearchResult<ArticleAnalysis> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(title.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let budget = self.failures_before_success.get(title).copied().unwrap_or(0);
        if attempt <= budget {
            return Err(ResearchError::Processing(format!(
                "transient failure on attempt {}",
                attempt
            )));
        }
        Ok(ArticleAnalysis {
            main_points: vec![format!("main point from {}", title)],
            summary: format!("summary of {}", title),
            key_statistics: vec!["90% of cases".to_string()],
            practical_tips: vec!["Measure before tuning".to_string()],
            expert_opinions: vec![],
            relevance: 0.85,
        })
    }
}

struct CapturingBlogModel {
    requests: Mutex<Vec<BlogRequest>>,
}

impl CapturingBlogModel {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BlogModel for CapturingBlogModel {
    async fn compose(&self, request: &BlogRequest) -> ResearchResult<BlogPost> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(BlogPost {
            title: format!("All about {}", request.topic),
            introduction: "intro".to_string(),
            key_sections: vec![BlogSection {
                heading: "Findings".to_string(),
                content: "content".to_string(),
            }],
            conclusion: "conclusion".to_string(),
        })
    }
}

fn article(session_id: Uuid, title: &str) -> Article {
    let result = SearchResult {
        title: title.to_string(),
        url: format!("https://example.com/{}", title.replace(' ', "-")),
        content: format!("full text of {}", title),
        score: 0.7,
        metadata: Map::new(),
    };
    Article::from_result(session_id, &result)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    }
}

async fn seeded_session(store: &MemoryStore, titles: &[&str]) -> Uuid {
    let id = store
        .create_session("test topic", SearchParameters::default())
        .await
        .unwrap();
    let articles: Vec<Article> = titles.iter().map(|t| article(id, t)).collect();
    store.save_articles(id, articles).await.unwrap();
    id
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let _ = tracing_subscriber::fmt().try_init();

    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(FlakyModel::new(&[("flaky article", 2)]));
    let session_id = seeded_session(&store, &["flaky article"]).await;

    let summarizer = ArticleSummarizer::new(model.clone(), store.clone())
        .with_retry_policy(fast_retry());
    let report = summarizer.process_session(session_id).await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.processed, 1);
    assert!(report.failed.is_empty());
    assert_eq!(model.attempts_for("flaky article"), 3);

    let stored = store.get_articles(session_id).await.unwrap();
    assert!(stored[0].summary.is_some());
    assert_eq!(stored[0].score, 0.85);
}

#[tokio::test]
async fn exhausted_retries_fail_only_that_article() {
    let store = Arc::new(MemoryStore::new());
    // Ten failures exceeds the three-attempt budget.
    let model = Arc::new(FlakyModel::new(&[("doomed article", 10)]));
    let session_id = seeded_session(&store, &["doomed article", "fine article"]).await;

    let summarizer = ArticleSummarizer::new(model.clone(), store.clone())
        .with_retry_policy(fast_retry());
    let report = summarizer.process_session(session_id).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].title, "doomed article");
    assert!((report.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(model.attempts_for("doomed article"), 3);
    assert_eq!(model.attempts_for("fine article"), 1);

    let stored = store.get_articles(session_id).await.unwrap();
    let doomed = stored.iter().find(|a| a.title == "doomed article").unwrap();
    assert!(doomed.summary.is_none());
}

#[tokio::test]
async fn processing_records_outcome_without_touching_status() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(FlakyModel::new(&[]));
    let session_id = seeded_session(&store, &["a", "b", "c"]).await;

    let summarizer = ArticleSummarizer::new(model, store.clone())
        .with_retry_policy(fast_retry())
        .with_concurrency(2);
    summarizer.process_session(session_id).await.unwrap();

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Initialized);
    assert_eq!(session.extra["processed_count"], serde_json::json!(3));
    assert_eq!(session.extra["total_count"], serde_json::json!(3));
    assert_eq!(session.extra["success_rate"], serde_json::json!(1.0));
    assert!(session.extra.contains_key("processed_at"));
    assert!(session.extra["failed_articles"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_session_is_a_processing_error() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(FlakyModel::new(&[]));
    let session_id = store
        .create_session("empty", SearchParameters::default())
        .await
        .unwrap();

    let summarizer = ArticleSummarizer::new(model, store);
    let err = summarizer.process_session(session_id).await.unwrap_err();
    assert!(matches!(err, ResearchError::Processing(_)));
}

#[tokio::test]
async fn blog_is_built_from_processed_articles_only() {
    let store = Arc::new(MemoryStore::new());
    let summary_model = Arc::new(FlakyModel::new(&[("unprocessed", 10)]));
    let session_id = seeded_session(&store, &["processed", "unprocessed"]).await;

    let summarizer = ArticleSummarizer::new(summary_model, store.clone())
        .with_retry_policy(fast_retry());
    summarizer.process_session(session_id).await.unwrap();

    let blog_model = Arc::new(CapturingBlogModel::new());
    let assembler = BlogAssembler::new(blog_model.clone(), store.clone());
    let post = assembler.generate(session_id).await.unwrap();

    assert_eq!(post.title, "All about test topic");

    let requests = blog_model.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.topic, "test topic");
    assert_eq!(request.article_count, 1);
    assert!(request
        .key_findings
        .iter()
        .any(|f| f.contains("main point from processed")));
    assert!(request.statistics.contains(&"90% of cases".to_string()));

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert!(session.extra.contains_key("blog_content"));
    assert!(session.extra.contains_key("blog_generated_at"));
}

#[tokio::test]
async fn blog_without_summaries_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let session_id = seeded_session(&store, &["never processed"]).await;

    let blog_model = Arc::new(CapturingBlogModel::new());
    let assembler = BlogAssembler::new(blog_model, store.clone());
    let err = assembler.generate(session_id).await.unwrap_err();
    assert!(matches!(err, ResearchError::Processing(_)));

    let err = assembler.generate(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ResearchError::SessionNotFound(_)));
}
