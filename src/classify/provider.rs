use async_trait::async_trait;

use crate::error::Result;
use crate::models::RawClassification;

/// A language-model backend that labels review texts. Results must be
/// aligned by position with `texts`.
#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn classify(&self, texts: &[String], model_version: &str) -> Result<Vec<RawClassification>>;
    /// Identifies the model for cache keys; a change invalidates cached results.
    fn model_version(&self) -> &str;
    fn name(&self) -> &str;
}
