use crate::types::SearchParameters;

/// Preferred-domain group size. The first domains in `include_domains` are
/// the caller's curated top sources and get the variant treatment.
pub const PREFERRED_GROUP_SIZE: usize = 8;

/// Qualifier templates used to widen recall against preferred domains.
/// `{query}` is substituted with the research topic. Kept as data so the
/// heuristic can be tuned without touching the aggregation algorithm.
pub fn default_query_templates() -> Vec<String> {
    vec![
        "{query} (research OR study)".to_string(),
        "{query} methodology".to_string(),
        "{query} review".to_string(),
        "{query}".to_string(),
    ]
}

/// The sub-queries the aggregator will issue, derived from the run
/// parameters before any provider call is made.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Variant queries against the preferred-domain group, in issue order.
    pub preferred_queries: Vec<String>,
    pub preferred_domains: Vec<String>,
    /// Single query against the remaining domains, if any exist.
    pub remaining_query: Option<String>,
    pub remaining_domains: Vec<String>,
}

impl QueryPlan {
    pub fn build(query: &str, params: &SearchParameters, templates: &[String]) -> Option<Self> {
        if params.include_domains.is_empty() {
            return None;
        }

        let split = params
            .include_domains
            .len()
            .min(PREFERRED_GROUP_SIZE);
        let preferred_domains = params.include_domains[..split].to_vec();
        let remaining_domains = params.include_domains[split..].to_vec();

        let preferred_clause = domain_clause(&preferred_domains);
        let preferred_queries = templates
            .iter()
            .map(|template| {
                let variant = template.replace("{query}", query);
                format!("{} ({})", variant, preferred_clause)
            })
            .collect();

        let remaining_query = if remaining_domains.is_empty() {
            None
        } else {
            Some(format!("{} ({})", query, domain_clause(&remaining_domains)))
        };

        Some(Self {
            preferred_queries,
            preferred_domains,
            remaining_query,
            remaining_domains,
        })
    }
}

fn domain_clause(domains: &[String]) -> String {
    domains
        .iter()
        .map(|d| format!("site:{}", d))
        .collect::<Vec<_>>()
        .join(" OR ")
}
