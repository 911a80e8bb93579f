use crate::types::{ResearchError, Result, SearchDepth, SearchResult};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Request issued for one sub-query. Mirrors the provider's wire contract;
/// score thresholds are applied by the aggregator, not the provider.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub search_depth: SearchDepth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_domains: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize, search_depth: SearchDepth) -> Self {
        Self {
            query: query.into(),
            max_results,
            search_depth,
            include_domains: None,
            exclude_domains: None,
        }
    }
}

/// External web-search provider. Errors are transient by contract and the
/// aggregator treats a failed call as zero results for that sub-query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;
}

// Provider-side response shape. `title` and `url` are required and missing
// values fail deserialization instead of defaulting.
#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    results: Vec<RawSearchResult>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

impl RawSearchResult {
    fn into_search_result(self) -> SearchResult {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), Value::String("tavily".to_string()));
        if let Some(date) = self.published_date {
            metadata.insert("published_date".to_string(), Value::String(date));
        }
        metadata.insert(
            "retrieved_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        SearchResult {
            title: self.title,
            url: self.url,
            content: self.content,
            score: self.score,
            metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub api_key: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl TavilyConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 1,
        }
    }
}

/// HTTP client for the Tavily search API with transient-error retry.
pub struct TavilyClient {
    client: Client,
    config: TavilyConfig,
}

impl TavilyClient {
    pub fn new(config: TavilyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .map_err(|e| ResearchError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn execute(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .header("api-key", &self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::Search(format!(
                "provider returned HTTP {}",
                status
            )));
        }

        let raw: RawSearchResponse = response.json().await?;
        let results: Vec<SearchResult> = raw
            .results
            .into_iter()
            .map(RawSearchResult::into_search_result)
            .collect();
        debug!("Provider returned {} results for: {}", results.len(), request.query);
        Ok(results)
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 8),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 30)),
            ..Default::default()
        };

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            match self.execute(request).await {
                Ok(results) => {
                    info!(
                        "Search succeeded ({} results): {}",
                        results.len(),
                        request.query
                    );
                    return Ok(results);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!(
                                "Search attempt {} failed for '{}', retrying in {:?}",
                                attempt + 1,
                                request.query,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ResearchError::Search("search failed with no attempts".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_result_requires_url_and_title() {
        let missing_url = r#"{"title": "t", "content": "c", "score": 0.5}"#;
        assert!(serde_json::from_str::<RawSearchResult>(missing_url).is_err());

        let minimal = r#"{"title": "t", "url": "http://x.com"}"#;
        let raw = serde_json::from_str::<RawSearchResult>(minimal).unwrap();
        assert_eq!(raw.score, 0.0);
        assert!(raw.content.is_empty());
    }

    #[test]
    fn raw_result_carries_metadata() {
        let json = r#"{"title": "t", "url": "http://x.com", "published_date": "2025-01-01"}"#;
        let result = serde_json::from_str::<RawSearchResult>(json)
            .unwrap()
            .into_search_result();
        assert_eq!(result.metadata["source"], "tavily");
        assert_eq!(result.metadata["published_date"], "2025-01-01");
        assert!(result.metadata.contains_key("retrieved_at"));
    }

    #[test]
    fn request_omits_empty_domain_filters() {
        let request = SearchRequest::new("q", 5, SearchDepth::Advanced);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("include_domains").is_none());
        assert_eq!(json["search_depth"], "advanced");
    }
}
