use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::aggregate::aggregate;
use crate::classify::{BatchClassifier, BatchSettings, ClassificationCache, ClassificationModel};
use crate::config::PipelineConfig;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::models::{AggregateReport, RunStats, Warning};
use crate::source::{FetchItem, ReviewFetcher, ReviewSource};

/// Fetch, dedupe, classify and aggregate the reviews of one app.
pub struct ReviewPipeline {
    fetcher: ReviewFetcher,
    classifier: BatchClassifier,
    config: PipelineConfig,
}

impl ReviewPipeline {
    pub fn new(
        source: Arc<dyn ReviewSource>,
        model: Arc<dyn ClassificationModel>,
        cache: Arc<ClassificationCache>,
        config: PipelineConfig,
    ) -> Self {
        let fetcher = ReviewFetcher::new(source, config.fetch_retry, config.fetch_timeout);
        let classifier = BatchClassifier::new(model, cache, BatchSettings::from(&config));
        Self {
            fetcher,
            classifier,
            config,
        }
    }

    pub async fn run(&self, app_id: &str) -> Result<AggregateReport> {
        self.run_with_cancel(app_id, &CancellationToken::new()).await
    }

    /// Partial fetches and degraded batches become warnings on the report.
    /// Fails only when nothing was fetched, nothing could be classified,
    /// or `cancel` fired.
    pub async fn run_with_cancel(&self, app_id: &str, cancel: &CancellationToken) -> Result<AggregateReport> {
        // Step 1: Fetch and dedupe
        tracing::info!("Fetching reviews for app {}", app_id);
        let mut stats = RunStats::default();
        let mut warnings = Vec::new();
        let mut dedup = Deduplicator::new();
        let mut reviews = Vec::new();

        let mut items = pin!(self.fetcher.fetch(
            app_id,
            self.config.max_pages,
            self.config.page_size,
            cancel,
        ));

        while let Some(item) = items.next().await {
            match item? {
                FetchItem::PageFetched { .. } => stats.pages_fetched += 1,
                FetchItem::Review(review) => reviews.extend(dedup.admit(review)),
                FetchItem::Malformed { .. } => stats.malformed_skipped += 1,
                FetchItem::Partial { page, reason } => {
                    warnings.push(Warning::PartialFetch { page, reason });
                }
            }
        }

        stats.duplicates_dropped = dedup.duplicates_dropped();
        tracing::info!(
            "Fetched {} unique reviews from {} pages ({} duplicates, {} malformed)",
            reviews.len(),
            stats.pages_fetched,
            stats.duplicates_dropped,
            stats.malformed_skipped
        );

        if reviews.is_empty() {
            return Err(Error::NoReviews(app_id.to_string()));
        }

        // Step 2: Classify, reusing cached results
        let outcome = self.classifier.classify(reviews, cancel).await?;
        stats.cache_hits = outcome.cache_hits;
        stats.model_calls = outcome.model_calls;
        stats.unclassified = outcome.unclassified;
        warnings.extend(outcome.warnings);

        if outcome.unclassified == outcome.results.len() {
            return Err(Error::NothingClassified(app_id.to_string()));
        }

        // Step 3: Aggregate
        let aggregator = aggregate(app_id, self.config.max_excerpts, &outcome.results);
        let report = aggregator.finish(outcome.results, warnings, stats);

        tracing::info!(
            "Report for {}: {} reviews, {} warnings",
            app_id,
            report.review_count,
            report.warnings.len()
        );

        Ok(report)
    }
}
