use crate::types::{ResearchError, Result, SearchResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const COHERE_ENDPOINT: &str = "https://api.cohere.ai/v1/rerank";
const RERANK_MODEL: &str = "rerank-multilingual-v2.0";

/// Optional relevance re-ranking over a sub-query's documents. Returned
/// results carry the reranker's score and are truncated to `top_n`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<SearchResult>,
        top_n: usize,
    ) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

// `index` refers to the position in the submitted documents array.
#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f64,
}

pub struct CohereReranker {
    client: Client,
    api_key: String,
}

impl CohereReranker {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResearchError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<SearchResult>,
        top_n: usize,
    ) -> Result<Vec<SearchResult>> {
        if documents.is_empty() {
            return Ok(documents);
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let request = RerankRequest {
            query,
            documents: texts,
            top_n: top_n.min(documents.len()),
            model: RERANK_MODEL,
        };

        let response = self
            .client
            .post(COHERE_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::Search(format!(
                "reranker returned HTTP {}",
                status
            )));
        }

        let parsed: RerankResponse = response.json().await?;
        let mut ranked = Vec::with_capacity(parsed.results.len());
        for hit in parsed.results {
            let Some(doc) = documents.get(hit.index) else {
                debug!("Reranker returned out-of-range index {}", hit.index);
                continue;
            };
            let mut doc = doc.clone();
            doc.score = hit.relevance_score;
            ranked.push(doc);
        }

        info!("Reranked {} documents for: {}", ranked.len(), query);
        Ok(ranked)
    }
}
