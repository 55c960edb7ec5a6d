use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::Review;
use crate::retry::{with_retry_gated, RetryPolicy};
use crate::source::provider::{ReviewSource, SourcePage};

#[derive(Debug, Clone)]
pub enum FetchItem {
    PageFetched { page: u32, received: usize },
    Review(Review),
    Malformed { page: u32, reason: String },
    /// Retries for `page` were exhausted; nothing after it was fetched.
    Partial { page: u32, reason: String },
}

/// Walks the review source page by page. Holds no state between calls,
/// so every `fetch` starts again from page 1.
pub struct ReviewFetcher {
    source: Arc<dyn ReviewSource>,
    retry: RetryPolicy,
    timeout: Duration,
}

struct Cursor {
    page: u32,
    done: bool,
}

impl ReviewFetcher {
    pub fn new(source: Arc<dyn ReviewSource>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            source,
            retry,
            timeout,
        }
    }

    /// Lazily yields reviews in page order. The stream ends after the last
    /// page, after `max_pages`, or after a `Partial` item. Cancellation ends
    /// it with `Err(Error::Cancelled)`.
    pub fn fetch<'a>(
        &'a self,
        app_id: &'a str,
        max_pages: u32,
        page_size: u32,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<FetchItem>> + Send + 'a {
        let start = Cursor { page: 1, done: false };

        stream::unfold(start, move |mut cursor| async move {
            if cursor.done || cursor.page > max_pages {
                return None;
            }

            let page = cursor.page;
            let items = match self.fetch_page(app_id, page, page_size, cancel).await {
                Ok(result) => {
                    let received = result.reviews.len();
                    cursor.done = received == 0 || received < page_size as usize || !result.has_more;
                    cursor.page += 1;
                    Self::page_items(result, app_id, page)
                }
                Err(Error::Cancelled) => {
                    cursor.done = true;
                    vec![Err(Error::Cancelled)]
                }
                Err(e) => {
                    tracing::warn!("Giving up on page {} for {}: {}", page, app_id, e);
                    cursor.done = true;
                    vec![Ok(FetchItem::Partial {
                        page,
                        reason: e.to_string(),
                    })]
                }
            };

            Some((stream::iter(items), cursor))
        })
        .flatten()
    }

    async fn fetch_page(
        &self,
        app_id: &str,
        page: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<SourcePage> {
        let label = format!("{} page {}", self.source.name(), page);
        with_retry_gated(
            &self.retry,
            self.timeout,
            cancel,
            &label,
            Error::is_retryable,
            || self.source.throttle(),
            || self.source.search(app_id, page, page_size),
        )
        .await
    }

    fn page_items(result: SourcePage, app_id: &str, page: u32) -> Vec<Result<FetchItem>> {
        let mut items = Vec::with_capacity(result.reviews.len() + 1);
        items.push(Ok(FetchItem::PageFetched {
            page,
            received: result.reviews.len(),
        }));

        for raw in result.reviews {
            let item = match Review::from_raw(raw, app_id, page) {
                Ok(review) => FetchItem::Review(review),
                Err(reason) => {
                    tracing::debug!("Skipping malformed review on page {}: {}", page, reason);
                    FetchItem::Malformed {
                        page,
                        reason: reason.to_string(),
                    }
                }
            };
            items.push(Ok(item));
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawReview;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct PagedSource {
        pages: u32,
        page_size: usize,
        fail_from: Option<u32>,
        calls: AtomicU32,
    }

    fn raw(page: u32, i: usize) -> RawReview {
        serde_json::from_value(json!({
            "id": format!("{}-{}", page, i),
            "text": format!("review {} on page {}", i, page),
            "rating": 4,
            "review_date": "2024-02-01",
            "author": {"name": format!("user{}", i)}
        }))
        .unwrap()
    }

    #[async_trait]
    impl ReviewSource for PagedSource {
        async fn search(&self, _app_id: &str, page: u32, _page_size: u32) -> Result<SourcePage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|f| page >= f) {
                return Err(Error::ReviewApi("503 - unavailable".to_string()));
            }
            if page > self.pages {
                return Ok(SourcePage::default());
            }
            let mut reviews: Vec<_> = (0..self.page_size).map(|i| raw(page, i)).collect();
            reviews.push(RawReview::default());
            Ok(SourcePage {
                reviews,
                has_more: page < self.pages,
            })
        }

        fn name(&self) -> &str {
            "paged"
        }
    }

    fn fetcher(source: Arc<PagedSource>) -> ReviewFetcher {
        ReviewFetcher::new(
            source,
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            Duration::from_secs(1),
        )
    }

    async fn collect(f: &ReviewFetcher, max_pages: u32, cancel: &CancellationToken) -> Vec<Result<FetchItem>> {
        f.fetch("app", max_pages, 3, cancel).collect().await
    }

    #[tokio::test]
    async fn test_stops_on_last_page() {
        let source = Arc::new(PagedSource { pages: 2, page_size: 3, fail_from: None, calls: AtomicU32::new(0) });
        let f = fetcher(source.clone());
        let items = collect(&f, 10, &CancellationToken::new()).await;

        let reviews = items.iter().filter(|i| matches!(i, Ok(FetchItem::Review(_)))).count();
        let malformed = items.iter().filter(|i| matches!(i, Ok(FetchItem::Malformed { .. }))).count();
        assert_eq!(reviews, 6);
        assert_eq!(malformed, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_respects_max_pages() {
        let source = Arc::new(PagedSource { pages: 10, page_size: 3, fail_from: None, calls: AtomicU32::new(0) });
        let f = fetcher(source.clone());
        let items = collect(&f, 3, &CancellationToken::new()).await;

        let pages: Vec<u32> = items
            .iter()
            .filter_map(|i| match i {
                Ok(FetchItem::PageFetched { page, .. }) => Some(*page),
                _ => None,
            })
            .collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_with_partial() {
        let source = Arc::new(PagedSource { pages: 5, page_size: 3, fail_from: Some(3), calls: AtomicU32::new(0) });
        let f = fetcher(source.clone());
        let items = collect(&f, 5, &CancellationToken::new()).await;

        let reviews = items.iter().filter(|i| matches!(i, Ok(FetchItem::Review(_)))).count();
        assert_eq!(reviews, 6);
        assert!(matches!(items.last(), Some(Ok(FetchItem::Partial { page: 3, .. }))));
        // two pages plus two attempts at page 3
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_ends_with_error() {
        let source = Arc::new(PagedSource { pages: 5, page_size: 3, fail_from: None, calls: AtomicU32::new(0) });
        let f = fetcher(source);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let items = collect(&f, 5, &cancel).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::Cancelled)));
    }

    /// Answers the first request with a 429 that blocks its limiter.
    struct LimitedSource {
        limiter: crate::source::RateLimiter,
        block: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReviewSource for LimitedSource {
        async fn search(&self, _app_id: &str, page: u32, _page_size: u32) -> Result<SourcePage> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.limiter.block_for(self.block).await;
                return Err(Error::RateLimited(0));
            }
            Ok(SourcePage {
                reviews: vec![raw(page, 0)],
                has_more: false,
            })
        }

        async fn throttle(&self) {
            self.limiter.wait().await;
        }

        fn name(&self) -> &str {
            "limited"
        }
    }

    #[tokio::test]
    async fn test_rate_limited_page_is_fetched_after_block() {
        let source = Arc::new(LimitedSource {
            limiter: crate::source::RateLimiter::new(100),
            block: Duration::from_millis(300),
            calls: AtomicU32::new(0),
        });
        let f = ReviewFetcher::new(
            source.clone(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
            Duration::from_millis(100),
        );

        let items = collect(&f, 1, &CancellationToken::new()).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(items.iter().any(|i| matches!(i, Ok(FetchItem::Review(_)))));
        assert!(!items.iter().any(|i| matches!(i, Ok(FetchItem::Partial { .. }))));
    }
}
