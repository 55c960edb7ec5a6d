use async_trait::async_trait;

use crate::error::Result;
use crate::models::RawReview;

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub reviews: Vec<RawReview>,
    pub has_more: bool,
}

#[async_trait]
pub trait ReviewSource: Send + Sync {
    async fn search(&self, app_id: &str, page: u32, page_size: u32) -> Result<SourcePage>;

    /// Waits until the source accepts another request. Runs outside the
    /// per-request timeout.
    async fn throttle(&self) {}

    fn name(&self) -> &str;
}
