use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    OpenAi,
    Claude,
}

impl FromStr for ModelProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(ModelProvider::OpenAi),
            "claude" | "anthropic" => Ok(ModelProvider::Claude),
            other => Err(Error::Config(format!("Unknown model provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub serpapi_key: String,
    pub provider: ModelProvider,
    pub model_api_key: String,
    pub model: Option<String>,
    pub max_pages: u32,
    pub page_size: u32,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub cache_capacity: usize,
    pub max_excerpts: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_env_for(None)
    }

    /// Like `from_env`, with the provider chosen by the caller when given.
    /// The model API key is read for the effective provider.
    pub fn from_env_for(provider: Option<ModelProvider>) -> Result<Self> {
        let serpapi_key = env::var("SERPAPI_KEY")
            .map_err(|_| Error::Config("SERPAPI_KEY environment variable not set".to_string()))?;

        let provider = match provider {
            Some(p) => p,
            None => env::var("REVIEWLENS_PROVIDER")
                .ok()
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(ModelProvider::OpenAi),
        };

        let key_var = match provider {
            ModelProvider::OpenAi => "OPENAI_API_KEY",
            ModelProvider::Claude => "ANTHROPIC_API_KEY",
        };
        let model_api_key = env::var(key_var)
            .map_err(|_| Error::Config(format!("{} environment variable not set", key_var)))?;

        let model = env::var("REVIEWLENS_MODEL").ok().filter(|m| !m.is_empty());

        Ok(Self {
            serpapi_key,
            provider,
            model_api_key,
            model,
            max_pages: parse_var("MAX_PAGES", 5),
            page_size: parse_var("PAGE_SIZE", 25),
            batch_size: parse_var("BATCH_SIZE", 10),
            max_concurrent_batches: parse_var("MAX_CONCURRENT_BATCHES", 3),
            cache_capacity: parse_var("CACHE_CAPACITY", 10_000),
            max_excerpts: parse_var("MAX_EXCERPTS", 3),
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_pages: u32,
    pub page_size: u32,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub max_excerpts: usize,
    pub fetch_retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub classify_retry: RetryPolicy,
    pub classify_timeout: Duration,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            page_size: 25,
            batch_size: 10,
            max_concurrent_batches: 3,
            max_excerpts: 3,
            fetch_retry: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8)),
            fetch_timeout: Duration::from_secs(30),
            classify_retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
            classify_timeout: Duration::from_secs(120),
            show_progress: false,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_pages: config.max_pages,
            page_size: config.page_size,
            batch_size: config.batch_size,
            max_concurrent_batches: config.max_concurrent_batches,
            max_excerpts: config.max_excerpts,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<ModelProvider>().unwrap(), ModelProvider::OpenAi);
        assert_eq!("anthropic".parse::<ModelProvider>().unwrap(), ModelProvider::Claude);
        assert!("gemini".parse::<ModelProvider>().is_err());
    }
}
