pub mod provider;
pub mod claude;
pub mod openai;
pub mod prompts;
pub mod parser;
pub mod cache;
pub mod batcher;

pub use provider::ClassificationModel;
pub use claude::ClaudeModel;
pub use openai::OpenAiModel;
pub use prompts::{DefaultPromptStrategy, PromptStrategy};
pub use cache::{ClassificationCache, Lookup};
pub use batcher::{BatchClassifier, BatchSettings, ClassifyOutcome};

/// `Retry-After` of a 429 response, in seconds.
fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(5)
}
