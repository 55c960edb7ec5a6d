use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use reviewlens::models::{AggregateReport, Sentiment};
use reviewlens::{
    ClassificationCache, ClassificationModel, ClaudeModel, Config, ModelProvider, OpenAiModel,
    PipelineConfig, ReviewPipeline, SerpApiSource,
};

#[derive(Parser, Debug)]
#[command(name = "reviewlens")]
#[command(version = "0.1.0")]
#[command(about = "Analyze App Store reviews with LLM sentiment and topic classification")]
struct Args {
    /// App Store product id (defaults to Microsoft Teams)
    #[arg(short, long, default_value = "1113153706")]
    app_id: String,

    /// Output format (json, text, markdown)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Maximum result pages to fetch
    #[arg(long)]
    max_pages: Option<u32>,

    /// Reviews requested per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Reviews per classification request
    #[arg(long)]
    batch_size: Option<usize>,

    /// Classification requests in flight at once
    #[arg(long)]
    max_concurrent_batches: Option<usize>,

    /// Model provider (openai, claude)
    #[arg(long)]
    provider: Option<ModelProvider>,

    /// Model name override
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("reviewlens=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = Config::from_env_for(args.provider)?;
    if args.model.is_some() {
        config.model = args.model.clone();
    }

    let mut pipeline_config = PipelineConfig::from(&config);
    pipeline_config.max_pages = args.max_pages.unwrap_or(pipeline_config.max_pages);
    pipeline_config.page_size = args.page_size.unwrap_or(pipeline_config.page_size);
    pipeline_config.batch_size = args.batch_size.unwrap_or(pipeline_config.batch_size);
    pipeline_config.max_concurrent_batches = args
        .max_concurrent_batches
        .unwrap_or(pipeline_config.max_concurrent_batches);
    pipeline_config.show_progress = true;

    // Initialize clients
    let source = SerpApiSource::new(&config.serpapi_key)?;
    let model: Arc<dyn ClassificationModel> = match config.provider {
        ModelProvider::OpenAi => Arc::new(OpenAiModel::new(config.model_api_key.clone(), config.model.clone())?),
        ModelProvider::Claude => Arc::new(ClaudeModel::new(config.model_api_key.clone(), config.model.clone())?),
    };
    let cache = Arc::new(ClassificationCache::new(config.cache_capacity));
    tracing::debug!("Classification cache holds up to {} entries", cache.capacity());

    let pipeline = ReviewPipeline::new(Arc::new(source), model, cache, pipeline_config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight requests");
            ctrl_c.cancel();
        }
    });

    tracing::info!("Starting analysis for app {}", args.app_id);
    let report = pipeline.run_with_cancel(&args.app_id, &cancel).await?;

    output_report(&report, &args)?;

    Ok(())
}

fn output_report(report: &AggregateReport, args: &Args) -> anyhow::Result<()> {
    let output = match args.format.as_str() {
        "json" => serde_json::to_string_pretty(report)?,
        "markdown" => format_markdown(report),
        _ => format_text(report),
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        tracing::info!("Output written to: {}", path);
    } else {
        println!("{}", output);
    }

    Ok(())
}

fn percent(count: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        count as f32 * 100.0 / total as f32
    }
}

fn insight_sections(report: &AggregateReport) -> [(&'static str, &[String]); 3] {
    [
        ("Common Issues", report.common_issues.as_slice()),
        ("Strengths", report.strengths.as_slice()),
        ("Feature Requests", report.feature_requests.as_slice()),
    ]
}

fn format_text(report: &AggregateReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("\n=== Review Analysis: app {} ===\n\n", report.app_id));
    output.push_str(&format!("Reviews analyzed: {}\n", report.review_count));
    output.push_str(&format!("Average rating: {:.1}\n", report.average_rating));
    output.push_str(&format!(
        "Overall sentiment: {} (score {:.2})\n",
        report.overall_sentiment, report.sentiment_score
    ));
    output.push_str(&format!(
        "Model calls: {} (cache hits: {})\n\n",
        report.stats.model_calls, report.stats.cache_hits
    ));

    output.push_str("Sentiment:\n");
    for (sentiment, count) in &report.sentiment_counts {
        output.push_str(&format!(
            "  {:<9} {:>4} ({:.0}%)\n",
            sentiment,
            count,
            percent(*count, report.review_count)
        ));
    }

    output.push_str("\nRatings:\n");
    for (i, count) in report.rating_distribution.iter().enumerate().rev() {
        output.push_str(&format!("  {} star: {}\n", i + 1, count));
    }

    let topics = report.top_topics(10);
    if !topics.is_empty() {
        output.push_str("\nTop Topics:\n");
        for (topic, count) in topics {
            output.push_str(&format!("  - {} ({})\n", topic, count));
        }
    }

    for (heading, items) in insight_sections(report) {
        if items.is_empty() {
            continue;
        }
        output.push_str(&format!("\n{}:\n", heading));
        for item in items {
            output.push_str(&format!("  - {}\n", item));
        }
    }

    for sentiment in Sentiment::ALL {
        let excerpts = report.sample_excerpts.get(&sentiment).cloned().unwrap_or_default();
        if excerpts.is_empty() {
            continue;
        }
        output.push_str(&format!("\nRecent {} reviews:\n", sentiment));
        for excerpt in excerpts {
            output.push_str(&format!("  \"{}\"\n", excerpt));
        }
    }

    if !report.warnings.is_empty() {
        output.push_str("\nWarnings:\n");
        for warning in report.warning_messages() {
            output.push_str(&format!("  ! {}\n", warning));
        }
    }

    output.push_str(&format!(
        "\nGenerated on: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    output
}

fn format_markdown(report: &AggregateReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Review Analysis: app {}\n\n", report.app_id));

    output.push_str("## Summary\n\n");
    output.push_str("| Metric | Value |\n|--------|-------|\n");
    output.push_str(&format!("| Reviews Analyzed | {} |\n", report.review_count));
    output.push_str(&format!("| Average Rating | {:.1} |\n", report.average_rating));
    output.push_str(&format!(
        "| Overall Sentiment | {} ({:.2}) |\n",
        report.overall_sentiment, report.sentiment_score
    ));
    output.push_str(&format!("| Pages Fetched | {} |\n", report.stats.pages_fetched));
    output.push_str(&format!("| Duplicates Dropped | {} |\n", report.stats.duplicates_dropped));
    output.push_str(&format!("| Unclassified | {} |\n", report.stats.unclassified));

    output.push_str("\n## Sentiment\n\n");
    output.push_str("| Sentiment | Reviews | Share |\n|-----------|---------|-------|\n");
    for (sentiment, count) in &report.sentiment_counts {
        output.push_str(&format!(
            "| {} | {} | {:.0}% |\n",
            sentiment,
            count,
            percent(*count, report.review_count)
        ));
    }

    let topics = report.top_topics(15);
    if !topics.is_empty() {
        output.push_str("\n## Top Topics\n\n");
        output.push_str("| Topic | Mentions |\n|-------|----------|\n");
        for (topic, count) in topics {
            output.push_str(&format!("| {} | {} |\n", topic, count));
        }
    }

    for (heading, items) in insight_sections(report) {
        if items.is_empty() {
            continue;
        }
        output.push_str(&format!("\n## {}\n\n", heading));
        for item in items {
            output.push_str(&format!("- {}\n", item));
        }
    }

    output.push_str("\n## Sample Reviews\n\n");
    for sentiment in Sentiment::ALL {
        if let Some(excerpts) = report.sample_excerpts.get(&sentiment) {
            for excerpt in excerpts {
                output.push_str(&format!("- **{}**: {}\n", sentiment, excerpt));
            }
        }
    }

    if !report.warnings.is_empty() {
        output.push_str("\n## Warnings\n\n");
        for warning in report.warning_messages() {
            output.push_str(&format!("- {}\n", warning));
        }
    }

    output.push_str(&format!(
        "\n---\n*Generated on {}*\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    output
}
