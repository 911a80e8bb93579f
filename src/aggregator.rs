use crate::query::{default_query_templates, QueryPlan};
use crate::rerank::Reranker;
use crate::search::{SearchProvider, SearchRequest};
use crate::store::SessionStore;
use crate::types::{
    AggregationStats, Article, ResearchError, Result, SearchParameters, SearchResult,
};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Tunables for the aggregation pipeline. The qualifier templates are data,
/// not control flow, so recall heuristics can change without touching the
/// algorithm.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub query_templates: Vec<String>,
    /// Factor applied to `min_score` for preferred-domain and backfill
    /// sub-queries.
    pub relaxed_score_factor: f64,
    /// Per-sub-query deadline; a slow provider call counts as a failed
    /// sub-query, never blocks the whole run.
    pub subquery_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            query_templates: default_query_templates(),
            relaxed_score_factor: 0.7,
            subquery_timeout: Duration::from_secs(30),
        }
    }
}

/// Coordinates search sub-queries, merges and deduplicates their results,
/// balances preferred against other domains, and persists progress to the
/// session store as it goes.
pub struct ResultAggregator {
    provider: Arc<dyn SearchProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    store: Arc<dyn SessionStore>,
    config: AggregatorConfig,
}

impl ResultAggregator {
    pub fn new(provider: Arc<dyn SearchProvider>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            provider,
            reranker: None,
            store,
            config: AggregatorConfig::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a complete research pipeline: create a session, aggregate,
    /// persist articles, finalize the session. Returns the session id.
    /// Any failure marks the session `failed` (best effort) and surfaces
    /// as a search error.
    pub async fn perform_research(
        &self,
        query: &str,
        params: SearchParameters,
    ) -> Result<Uuid> {
        info!("Initiating research for: {}", query);
        let session_id = self.store.create_session(query, params.clone()).await?;

        match self.run_pipeline(session_id, query, &params).await {
            Ok(stats) => {
                info!(
                    "Research session {} complete: {} found, {} preferred, {} other, {} saved",
                    session_id,
                    stats.total_found,
                    stats.preferred_count,
                    stats.other_count,
                    stats.final_count
                );
                Ok(session_id)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Research session {} failed: {}", session_id, message);
                let mut patch = Map::new();
                patch.insert("status".to_string(), json!("failed"));
                patch.insert("error".to_string(), json!(message));
                if let Err(update_err) = self.store.update_session(session_id, patch).await {
                    error!(
                        "Could not mark session {} as failed: {}",
                        session_id, update_err
                    );
                }
                Err(ResearchError::Search(message))
            }
        }
    }

    async fn run_pipeline(
        &self,
        session_id: Uuid,
        query: &str,
        params: &SearchParameters,
    ) -> Result<AggregationStats> {
        let (results, stats) = self.aggregate(session_id, query, params).await?;

        if results.is_empty() {
            warn!("No results found for query: {}", query);
        }

        let articles: Vec<Article> = results
            .iter()
            .map(|r| Article::from_result(session_id, r))
            .collect();
        self.store.save_articles(session_id, articles).await?;

        let mut patch = Map::new();
        patch.insert("status".to_string(), json!("completed"));
        patch.insert("stats".to_string(), serde_json::to_value(&stats)?);
        patch.insert(
            "completed_at".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        self.store.update_session(session_id, patch).await?;

        Ok(stats)
    }

    /// The core operation: issue sub-queries per the query plan, then
    /// dedupe, partition, rank, balance and backfill into at most
    /// `max_results` documents. Progress is persisted after every phase.
    pub async fn aggregate(
        &self,
        session_id: Uuid,
        query: &str,
        params: &SearchParameters,
    ) -> Result<(Vec<SearchResult>, AggregationStats)> {
        let started = Instant::now();
        let max_results = params.max_results;
        let relaxed_score = params.min_score * self.config.relaxed_score_factor;

        self.update_status(session_id, "searching").await?;

        let mut collected: Vec<SearchResult> = Vec::new();

        match QueryPlan::build(query, params, &self.config.query_templates) {
            Some(plan) => {
                // Preferred-domain variants: relaxed threshold, capped
                // quota, early stop at half the target.
                let variant_quota = max_results / 4;
                if variant_quota > 0 {
                    for variant in &plan.preferred_queries {
                        if collected.len() >= max_results / 2 {
                            break;
                        }
                        match self
                            .run_subquery(
                                variant,
                                variant_quota,
                                relaxed_score,
                                Some(plan.preferred_domains.clone()),
                                params,
                            )
                            .await
                        {
                            Ok(results) if !results.is_empty() => {
                                collected.extend(results);
                                self.update_progress(
                                    session_id,
                                    "preferred_search",
                                    collected.len(),
                                )
                                .await?;
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Preferred-domain sub-query failed: {}", e),
                        }
                    }
                }

                // One pass over the remaining domains at the full
                // threshold, sized to the gap.
                if let Some(remaining_query) = &plan.remaining_query {
                    if collected.len() < max_results {
                        match self
                            .run_subquery(
                                remaining_query,
                                max_results - collected.len(),
                                params.min_score,
                                Some(plan.remaining_domains.clone()),
                                params,
                            )
                            .await
                        {
                            Ok(results) if !results.is_empty() => {
                                collected.extend(results);
                                self.update_progress(
                                    session_id,
                                    "remaining_search",
                                    collected.len(),
                                )
                                .await?;
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Remaining-domain sub-query failed: {}", e),
                        }
                    }
                }
            }
            None => {
                // No domain filter: a single query with a x2 overshoot to
                // absorb later dedup/filter losses.
                match self
                    .run_subquery(query, max_results * 2, params.min_score, None, params)
                    .await
                {
                    Ok(results) => collected = results,
                    Err(e) => warn!("Open-web sub-query failed: {}", e),
                }
                self.update_progress(session_id, "open_search", collected.len())
                    .await?;
            }
        }

        self.update_status(session_id, "processing").await?;

        let merged = merge_by_url(collected);
        let total_found = merged.len();

        let (preferred, other) =
            partition_and_rank(merged, &params.include_domains, &params.exclude_domains);
        let preferred_count = preferred.len();
        let other_count = other.len();

        let mut final_results = take_quota(preferred, other, max_results);

        // Backfill only on shortfall, relaxed threshold, deduplicated
        // against what is already chosen.
        if final_results.len() < max_results {
            let shortfall = max_results - final_results.len();
            match self
                .run_subquery(query, shortfall, relaxed_score, None, params)
                .await
            {
                Ok(extra) => {
                    let chosen: HashSet<String> = final_results
                        .iter()
                        .map(|r| r.url.to_lowercase())
                        .collect();
                    final_results.extend(
                        extra
                            .into_iter()
                            .filter(|r| !chosen.contains(&r.url.to_lowercase())),
                    );
                    final_results.truncate(max_results);
                }
                Err(e) => warn!("Backfill sub-query failed: {}", e),
            }
            self.update_progress(session_id, "backfill", final_results.len())
                .await?;
        }

        let stats = AggregationStats {
            total_found,
            preferred_count,
            other_count,
            final_count: final_results.len(),
            processing_time_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            "Aggregation for session {}: {} unique, {} preferred, {} other, {} final",
            session_id, total_found, preferred_count, other_count, stats.final_count
        );

        Ok((final_results, stats))
    }

    /// One provider call with a deadline, optional reranking and a score
    /// threshold. A zero quota skips the call entirely.
    async fn run_subquery(
        &self,
        query: &str,
        max_results: usize,
        min_score: f64,
        include_domains: Option<Vec<String>>,
        params: &SearchParameters,
    ) -> Result<Vec<SearchResult>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let mut request = SearchRequest::new(query, max_results, params.search_depth);
        request.include_domains = include_domains;
        if request.include_domains.is_none() && !params.exclude_domains.is_empty() {
            request.exclude_domains = Some(params.exclude_domains.clone());
        }

        let results = tokio::time::timeout(
            self.config.subquery_timeout,
            self.provider.search(&request),
        )
        .await
        .map_err(|_| ResearchError::Search(format!("sub-query timed out: {}", query)))??;

        let results = match &self.reranker {
            Some(reranker) => reranker.rerank(query, results, max_results).await?,
            None => results,
        };

        Ok(results
            .into_iter()
            .filter(|r| r.score >= min_score)
            .collect())
    }

    async fn update_status(&self, session_id: Uuid, status: &str) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("status".to_string(), Value::String(status.to_string()));
        self.store.update_session(session_id, patch).await?;
        Ok(())
    }

    async fn update_progress(
        &self,
        session_id: Uuid,
        phase: &str,
        results_found: usize,
    ) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("current_phase".to_string(), json!(phase));
        patch.insert("results_found".to_string(), json!(results_found));
        self.store.update_session(session_id, patch).await?;
        Ok(())
    }
}

/// Merge results keyed by lowercase URL, keeping the highest-scoring
/// variant of each duplicate. A strict max-reduction: sub-query order
/// never affects which duplicate survives.
pub fn merge_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashMap<String, SearchResult> = HashMap::new();
    for result in results {
        let key = result.url.to_lowercase();
        match seen.get(&key) {
            Some(kept) if kept.score >= result.score => {}
            _ => {
                seen.insert(key, result);
            }
        }
    }
    seen.into_values().collect()
}

fn url_matches_any(url_lower: &str, domains: &[String]) -> bool {
    domains
        .iter()
        .any(|domain| url_lower.contains(&domain.to_lowercase()))
}

/// Split into preferred (URL matches an include domain) and other (matches
/// neither list); preferred membership overrides exclusion. Both partitions
/// come back sorted descending by score.
pub fn partition_and_rank(
    results: Vec<SearchResult>,
    include_domains: &[String],
    exclude_domains: &[String],
) -> (Vec<SearchResult>, Vec<SearchResult>) {
    let mut preferred = Vec::new();
    let mut other = Vec::new();

    for result in results {
        let url_lower = result.url.to_lowercase();
        if url_matches_any(&url_lower, include_domains) {
            preferred.push(result);
        } else if !url_matches_any(&url_lower, exclude_domains) {
            other.push(result);
        }
    }

    let by_score_desc = |a: &SearchResult, b: &SearchResult| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    preferred.sort_by(by_score_desc);
    other.sort_by(by_score_desc);

    (preferred, other)
}

/// Up to `max_results / 2` slots go to the preferred partition, the rest
/// is filled from other. A small preferred set is exhausted silently.
pub fn take_quota(
    preferred: Vec<SearchResult>,
    other: Vec<SearchResult>,
    max_results: usize,
) -> Vec<SearchResult> {
    let preferred_limit = max_results / 2;
    let mut combined: Vec<SearchResult> =
        preferred.into_iter().take(preferred_limit).collect();
    let remaining = max_results - combined.len();
    combined.extend(other.into_iter().take(remaining));
    combined
}
