use clap::Parser;
use research_aggregator::{
    ArticleSummarizer, BlogAssembler, CohereReranker, MemoryStore, OpenAiClient, PgStore,
    ResearchConfig, ResearchError, ResultAggregator, SearchDepth, SearchParameters, SessionStore,
    TavilyClient, TavilyConfig,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "research-aggregator")]
#[command(about = "Gather, dedupe and summarize web research for a topic")]
struct Cli {
    /// Research topic to search for
    query: String,

    #[arg(long, default_value_t = 10)]
    max_results: usize,

    #[arg(long, default_value_t = 0.6)]
    min_score: f64,

    /// Domains to prioritize, comma-separated (first 8 are searched first)
    #[arg(long, value_delimiter = ',')]
    include_domains: Vec<String>,

    /// Domains to drop from results, comma-separated
    #[arg(long, value_delimiter = ',')]
    exclude_domains: Vec<String>,

    #[arg(long, default_value = "advanced")]
    search_depth: String,

    /// Run LLM summarization over the gathered articles
    #[arg(long)]
    summarize: bool,

    /// Generate a blog post from the summaries (implies --summarize)
    #[arg(long)]
    blog: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = ResearchConfig::from_env()?;

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            info!("Using Postgres session store");
            Arc::new(PgStore::connect(url).await?)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory session store");
            Arc::new(MemoryStore::new())
        }
    };

    let provider = Arc::new(TavilyClient::new(TavilyConfig::new(
        config.tavily_api_key.clone(),
    ))?);

    let mut aggregator = ResultAggregator::new(provider, Arc::clone(&store));
    if let Some(cohere_key) = &config.cohere_api_key {
        aggregator = aggregator.with_reranker(Arc::new(CohereReranker::new(cohere_key.clone())?));
    }

    let search_depth = match cli.search_depth.as_str() {
        "basic" => SearchDepth::Basic,
        "advanced" => SearchDepth::Advanced,
        other => {
            return Err(
                ResearchError::InvalidArgument(format!("unknown search depth: {}", other)).into(),
            )
        }
    };

    let params = SearchParameters {
        max_results: cli.max_results,
        min_score: cli.min_score,
        include_domains: cli.include_domains,
        exclude_domains: cli.exclude_domains,
        search_depth,
    };

    let session_id = aggregator.perform_research(&cli.query, params).await?;
    println!("Research session: {}", session_id);

    let mut saved_count = 0;
    if let Some(session) = store.get_session(session_id).await? {
        if let Some(stats) = &session.stats {
            saved_count = stats.final_count;
            println!("Results found:   {}", stats.total_found);
            println!("Preferred:       {}", stats.preferred_count);
            println!("Other sources:   {}", stats.other_count);
            println!("Saved:           {}", stats.final_count);
        }
    }

    if saved_count == 0 {
        warn!("No results passed filtering; try a lower --min-score");
        return Ok(());
    }

    if cli.summarize || cli.blog {
        let openai_key = config.openai_api_key.clone().ok_or_else(|| {
            ResearchError::Configuration("OPENAI_API_KEY is required for --summarize".to_string())
        })?;
        let model = Arc::new(OpenAiClient::new(openai_key)?);

        let summarizer = ArticleSummarizer::new(model.clone(), Arc::clone(&store));
        let report = summarizer.process_session(session_id).await?;
        println!(
            "Processed {}/{} articles ({:.0}% success)",
            report.processed,
            report.total,
            report.success_rate * 100.0
        );
        for failure in &report.failed {
            warn!("Failed: {} ({})", failure.title, failure.error);
        }

        if cli.blog {
            let assembler = BlogAssembler::new(model, Arc::clone(&store));
            let post = assembler.generate(session_id).await?;
            println!("\n# {}\n", post.title);
            println!("{}\n", post.introduction);
            for section in &post.key_sections {
                println!("## {}\n\n{}\n", section.heading, section.content);
            }
            println!("{}", post.conclusion);
        }
    }

    Ok(())
}
