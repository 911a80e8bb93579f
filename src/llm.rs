use crate::types::{ArticleAnalysis, BlogPost, ResearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a precise research analyst. Analyze the article and return JSON matching exactly this schema:
{
    "main_points": ["point1", "point2", ...],
    "summary": "text",
    "key_statistics": ["stat1", ...],
    "practical_tips": ["tip1", ...],
    "expert_opinions": [{"expert": "name", "quote": "text"}, ...],
    "relevance": 0.0
}
Requirements: at least 10 detailed main points covering different aspects of the topic; a comprehensive summary under 1000 characters in an academic tone; all numerical data as key statistics (empty array if none); at least 3 actionable practical tips starting with a verb; expert quotes where present; a relevance score between 0.0 and 1.0 reflecting depth and specificity."#;

const BLOG_SYSTEM_PROMPT: &str = r#"You are a professional blog writer specializing in engaging, research-based content. Your response must be a valid JSON object with this structure:
{
    "title": "An engaging, SEO-friendly blog post title",
    "introduction": "Compelling introduction that hooks the reader (300-500 words)",
    "key_sections": [{"heading": "Section heading", "content": "Detailed section content"}],
    "conclusion": "Summary of key points and final thoughts (200-300 words)"
}
Write 3-5 key sections in a professional but accessible tone, incorporate statistics where relevant, and provide practical takeaways."#;

/// Structured summarization of one article's text.
#[async_trait]
pub trait SummaryModel: Send + Sync {
    async fn analyze(&self, title: &str, content: &str) -> Result<ArticleAnalysis>;
}

/// Everything the blog prompt needs, extracted from processed articles.
#[derive(Debug, Clone)]
pub struct BlogRequest {
    pub topic: String,
    pub article_count: usize,
    pub key_findings: Vec<String>,
    pub statistics: Vec<String>,
    pub practical_tips: Vec<String>,
}

/// Final blog prose generation from aggregated research.
#[async_trait]
pub trait BlogModel: Send + Sync {
    async fn compose(&self, request: &BlogRequest) -> Result<BlogPost>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI-compatible chat client in JSON mode; backs both the article
/// analysis and the blog generation.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ResearchError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn chat_json(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(OPENAI_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::Processing(format!(
                "model API returned HTTP {}",
                status
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ResearchError::Processing("model returned no choices".to_string()))?;
        debug!("Model returned {} bytes of JSON", content.len());
        Ok(content)
    }
}

#[async_trait]
impl SummaryModel for OpenAiClient {
    async fn analyze(&self, title: &str, content: &str) -> Result<ArticleAnalysis> {
        let user = format!("Title: {}\n\nContent: {}", title, content);
        let raw = self.chat_json(ANALYSIS_SYSTEM_PROMPT, &user).await?;
        serde_json::from_str(&raw).map_err(|e| {
            ResearchError::Processing(format!("model returned invalid analysis: {}", e))
        })
    }
}

#[async_trait]
impl BlogModel for OpenAiClient {
    async fn compose(&self, request: &BlogRequest) -> Result<BlogPost> {
        let bullets = |items: &[String]| {
            items
                .iter()
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user = format!(
            "Create a comprehensive blog post about {} based on the following research:\n\n\
             Key findings from {} articles:\n{}\n\n\
             Key statistics:\n{}\n\n\
             Practical advice:\n{}",
            request.topic,
            request.article_count,
            bullets(&request.key_findings),
            bullets(&request.statistics),
            bullets(&request.practical_tips),
        );

        let raw = self.chat_json(BLOG_SYSTEM_PROMPT, &user).await?;
        serde_json::from_str(&raw).map_err(|e| {
            ResearchError::Processing(format!("model returned invalid blog structure: {}", e))
        })
    }
}
