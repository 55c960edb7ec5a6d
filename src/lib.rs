pub mod config;
pub mod error;
pub mod retry;
pub mod models;
pub mod source;
pub mod dedup;
pub mod topics;
pub mod classify;
pub mod aggregate;
pub mod pipeline;

pub use config::{Config, ModelProvider, PipelineConfig};
pub use error::{Error, Result};
pub use source::{ReviewSource, SerpApiSource};
pub use classify::{ClassificationCache, ClassificationModel, ClaudeModel, OpenAiModel};
pub use pipeline::ReviewPipeline;
