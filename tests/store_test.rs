use research_aggregator::{
    Article, ArticleAnalysis, MemoryStore, ResearchError, SearchParameters, SearchResult,
    SessionStatus, SessionStore,
};
use serde_json::{json, Map};
use uuid::Uuid;

fn store() -> MemoryStore {
    MemoryStore::new()
}

fn search_result(url: &str) -> SearchResult {
    SearchResult {
        title: format!("title {}", url),
        url: url.to_string(),
        content: "body text".to_string(),
        score: 0.8,
        metadata: Map::new(),
    }
}

fn analysis() -> ArticleAnalysis {
    ArticleAnalysis {
        main_points: vec!["point".to_string()],
        summary: "summary".to_string(),
        key_statistics: vec![],
        practical_tips: vec![],
        expert_opinions: vec![],
        relevance: 0.9,
    }
}

#[tokio::test]
async fn created_session_is_retrievable_with_defaults() {
    let store = store();
    let id = store
        .create_session("rust async runtimes", SearchParameters::default())
        .await
        .unwrap();

    let session = store.get_session(id).await.unwrap().unwrap();
    assert_eq!(session.id, id);
    assert_eq!(session.query, "rust async runtimes");
    assert_eq!(session.status, SessionStatus::Initialized);
    assert_eq!(session.results_found, 0);
    assert!(session.update_history.is_empty());
    assert!(session.completed_at.is_none());
}

#[tokio::test]
async fn unknown_session_lookups_and_updates() {
    let store = store();
    let missing = Uuid::new_v4();

    assert!(store.get_session(missing).await.unwrap().is_none());

    let mut patch = Map::new();
    patch.insert("status".to_string(), json!("searching"));
    let err = store.update_session(missing, patch).await.unwrap_err();
    assert!(matches!(err, ResearchError::SessionNotFound(id) if id == missing));

    let err = store
        .save_articles(missing, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::SessionNotFound(_)));
}

#[tokio::test]
async fn updates_append_history_with_previous_values() {
    let store = store();
    let id = store
        .create_session("q", SearchParameters::default())
        .await
        .unwrap();

    let mut patch = Map::new();
    patch.insert("status".to_string(), json!("searching"));
    patch.insert("results_found".to_string(), json!(4));
    let outcome = store.update_session(id, patch).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.modified_count, 2);

    let mut patch = Map::new();
    patch.insert("results_found".to_string(), json!(9));
    store.update_session(id, patch).await.unwrap();

    let session = store.get_session(id).await.unwrap().unwrap();
    assert_eq!(session.results_found, 9);
    assert_eq!(session.update_history.len(), 2);

    let second = &session.update_history[1];
    assert_eq!(second.modified_fields, vec!["results_found".to_string()]);
    assert_eq!(second.previous_values["results_found"], json!(4));
}

#[tokio::test]
async fn empty_patch_is_rejected() {
    let store = store();
    let id = store
        .create_session("q", SearchParameters::default())
        .await
        .unwrap();

    let err = store.update_session(id, Map::new()).await.unwrap_err();
    assert!(matches!(err, ResearchError::InvalidArgument(_)));

    // The rejected update must leave no trace in the history.
    let session = store.get_session(id).await.unwrap().unwrap();
    assert!(session.update_history.is_empty());
}

#[tokio::test]
async fn status_never_moves_backward() {
    let store = store();
    let id = store
        .create_session("q", SearchParameters::default())
        .await
        .unwrap();

    for status in ["searching", "processing", "completed"] {
        let mut patch = Map::new();
        patch.insert("status".to_string(), json!(status));
        store.update_session(id, patch).await.unwrap();
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), json!("searching"));
    assert!(store.update_session(id, patch).await.is_err());

    // Failed is reachable even after completion, and then locked.
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!("failed"));
    store.update_session(id, patch).await.unwrap();

    let mut patch = Map::new();
    patch.insert("status".to_string(), json!("completed"));
    assert!(store.update_session(id, patch).await.is_err());
}

#[tokio::test]
async fn articles_round_trip_and_summaries_attach() {
    let store = store();
    let id = store
        .create_session("q", SearchParameters::default())
        .await
        .unwrap();

    let articles = vec![
        Article::from_result(id, &search_result("https://a.com/1")),
        Article::from_result(id, &search_result("https://b.com/2")),
    ];
    let first_id = articles[0].id;

    let saved = store.save_articles(id, articles).await.unwrap();
    assert_eq!(saved, 2);

    store
        .update_article_summary(id, first_id, analysis())
        .await
        .unwrap();

    let stored = store.get_articles(id).await.unwrap();
    assert_eq!(stored.len(), 2);

    let first = stored.iter().find(|a| a.id == first_id).unwrap();
    assert!(first.summary.is_some());
    assert!(first.processed_at.is_some());
    // Relevance from the analysis replaces the search score.
    assert_eq!(first.score, 0.9);

    let other = stored.iter().find(|a| a.id != first_id).unwrap();
    assert!(other.summary.is_none());

    let err = store
        .update_article_summary(id, Uuid::new_v4(), analysis())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::InvalidArgument(_)));
}

#[tokio::test]
async fn cleanup_respects_retention_window() {
    let store = store();
    let id = store
        .create_session("q", SearchParameters::default())
        .await
        .unwrap();
    store
        .save_articles(id, vec![Article::from_result(id, &search_result("https://a.com/1"))])
        .await
        .unwrap();

    let stats = store.cleanup_old_sessions(30).await.unwrap();
    assert_eq!(stats.sessions_removed, 0);
    assert!(store.get_session(id).await.unwrap().is_some());

    // A zero-day window makes every existing session stale.
    let stats = store.cleanup_old_sessions(0).await.unwrap();
    assert_eq!(stats.sessions_removed, 1);
    assert_eq!(stats.articles_removed, 1);
    assert!(store.get_session(id).await.unwrap().is_none());
    assert!(store.get_articles(id).await.unwrap().is_empty());
}
