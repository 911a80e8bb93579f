use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single document returned by the search provider. Identity within one
/// research run is the lowercase-normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

impl std::fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchDepth::Basic => write!(f, "basic"),
            SearchDepth::Advanced => write!(f, "advanced"),
        }
    }
}

/// Run parameters, snapshotted into the session config at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameters {
    pub max_results: usize,
    pub min_score: f64,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub search_depth: SearchDepth,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.6,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            search_depth: SearchDepth::Advanced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initialized,
    Searching,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Initialized => 0,
            SessionStatus::Searching => 1,
            SessionStatus::Processing => 2,
            SessionStatus::Completed => 3,
            SessionStatus::Failed => 4,
        }
    }

    /// Transitions are forward-only; `Failed` is terminal but reachable
    /// from any non-terminal state.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Failed, _) => false,
            (_, SessionStatus::Failed) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

/// One mutation recorded against a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    pub modified_fields: Vec<String>,
    pub previous_values: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationStats {
    pub total_found: usize,
    pub preferred_count: usize,
    pub other_count: usize,
    pub final_count: usize,
    pub processing_time_secs: f64,
}

/// One end-to-end research run. `id`, `query` and `config` are immutable
/// after creation; everything else moves through the patch interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub query: String,
    pub config: SearchParameters,
    pub status: SessionStatus,
    #[serde(default)]
    pub results_found: usize,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub stats: Option<AggregationStats>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_history: Vec<UpdateRecord>,
    /// Ad-hoc fields written by later pipeline stages (processed counts,
    /// blog content). Kept loose to match the document-store shape.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(query: &str, config: SearchParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            config,
            status: SessionStatus::Initialized,
            results_found: 0,
            current_phase: None,
            stats: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            update_history: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// An expert quote extracted by the summarization model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpertOpinion {
    pub expert: String,
    pub quote: String,
}

/// Structured output of the article summarization model. Required fields
/// are strict; an LLM response missing them fails deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    pub main_points: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub key_statistics: Vec<String>,
    #[serde(default)]
    pub practical_tips: Vec<String>,
    #[serde(default)]
    pub expert_opinions: Vec<ExpertOpinion>,
    pub relevance: f64,
}

/// Persisted document, one per unique URL per session. Uniqueness is
/// enforced by the aggregator before save, not by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub summary: Option<ArticleAnalysis>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn from_result(session_id: Uuid, result: &SearchResult) -> Self {
        let mut metadata = result.metadata.clone();
        metadata.insert(
            "added_date".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        Self {
            id: Uuid::new_v4(),
            session_id,
            title: result.title.clone(),
            url: result.url.clone(),
            content: result.content.clone(),
            score: result.score,
            source: "web".to_string(),
            metadata,
            summary: None,
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogSection {
    pub heading: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogPost {
    pub title: String,
    pub introduction: String,
    pub key_sections: Vec<BlogSection>,
    pub conclusion: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("search failed: {0}")]
    Search(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
