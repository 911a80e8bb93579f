use crate::types::{ResearchError, Result};
use std::env;

/// Credentials and connection settings read from the environment at
/// startup. A missing search key is fatal before any session is created;
/// the other services are optional features.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub tavily_api_key: String,
    pub openai_api_key: Option<String>,
    pub cohere_api_key: Option<String>,
    pub database_url: Option<String>,
}

impl ResearchConfig {
    pub fn from_env() -> Result<Self> {
        let tavily_api_key = env::var("TAVILY_API_KEY").map_err(|_| {
            ResearchError::Configuration("TAVILY_API_KEY is not set".to_string())
        })?;
        if tavily_api_key.trim().is_empty() {
            return Err(ResearchError::Configuration(
                "TAVILY_API_KEY is empty".to_string(),
            ));
        }

        Ok(Self {
            tavily_api_key,
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            cohere_api_key: non_empty_var("COHERE_API_KEY"),
            database_url: non_empty_var("DATABASE_URL"),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
