pub mod aggregator;
pub mod blog;
pub mod config;
pub mod llm;
pub mod query;
pub mod rerank;
pub mod search;
pub mod store;
pub mod summarizer;
pub mod types;

pub use aggregator::{AggregatorConfig, ResultAggregator};
pub use blog::BlogAssembler;
pub use config::ResearchConfig;
pub use llm::{BlogModel, BlogRequest, OpenAiClient, SummaryModel};
pub use query::QueryPlan;
pub use rerank::{CohereReranker, Reranker};
pub use search::{SearchProvider, SearchRequest, TavilyClient, TavilyConfig};
pub use store::{MemoryStore, PgStore, SessionStore, UpdateOutcome};
pub use summarizer::{ArticleSummarizer, ProcessingReport, RetryPolicy};
pub use types::*;
