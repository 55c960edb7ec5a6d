use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::classify::cache::{ClassificationCache, ComputeGuard, Lookup, PendingClassification};
use crate::classify::provider::ClassificationModel;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::models::{Classification, RawClassification, Review, ReviewDetail, Sentiment, Warning};
use crate::retry::{with_retry_when, RetryPolicy};
use crate::topics::TopicTaxonomy;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub show_progress: bool,
}

impl From<&PipelineConfig> for BatchSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            retry: config.classify_retry,
            timeout: config.classify_timeout,
            show_progress: config.show_progress,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    pub results: Vec<ReviewDetail>,
    pub warnings: Vec<Warning>,
    pub cache_hits: usize,
    pub model_calls: usize,
    pub unclassified: usize,
}

impl ClassifyOutcome {
    fn absorb(&mut self, other: ClassifyOutcome) {
        self.results.extend(other.results);
        self.warnings.extend(other.warnings);
        self.cache_hits += other.cache_hits;
        self.model_calls += other.model_calls;
        self.unclassified += other.unclassified;
    }

    fn hit(review: Review, classification: Classification) -> Self {
        Self {
            results: vec![ReviewDetail {
                review,
                classification,
                cached: true,
            }],
            cache_hits: 1,
            ..Default::default()
        }
    }
}

type Claimed = (Review, ComputeGuard);

/// Model failures worth retrying at the same batch composition. Malformed
/// output is included since model replies are not deterministic.
fn is_transient_model_error(error: &Error) -> bool {
    error.is_retryable() || matches!(error, Error::ParseError(_) | Error::Misaligned { .. })
}

/// Resolves reviews against the cache and classifies the misses in bounded,
/// concurrently dispatched batches. Failing batches are retried, then halved
/// until the failing review is isolated and given the sentinel classification.
pub struct BatchClassifier {
    model: Arc<dyn ClassificationModel>,
    cache: Arc<ClassificationCache>,
    taxonomy: TopicTaxonomy,
    settings: BatchSettings,
}

impl BatchClassifier {
    pub fn new(
        model: Arc<dyn ClassificationModel>,
        cache: Arc<ClassificationCache>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            model,
            cache,
            taxonomy: TopicTaxonomy::new(),
            settings,
        }
    }

    /// Every input review appears exactly once in the result, in no
    /// particular order. Only cancellation is returned as an error.
    pub async fn classify(&self, reviews: Vec<Review>, cancel: &CancellationToken) -> Result<ClassifyOutcome> {
        let version = self.model.model_version().to_string();
        let mut outcome = ClassifyOutcome::default();
        let mut misses: Vec<Claimed> = Vec::new();
        let mut waiting: Vec<(Review, PendingClassification)> = Vec::new();

        for review in reviews {
            match self.cache.claim(&review.fingerprint, &version) {
                Lookup::Hit(classification) => outcome.absorb(ClassifyOutcome::hit(review, classification)),
                Lookup::Compute(guard) => misses.push((review, guard)),
                Lookup::Wait(pending) => waiting.push((review, pending)),
            }
        }

        tracing::info!(
            "{} cached, {} to classify, {} already in flight",
            outcome.cache_hits,
            misses.len(),
            waiting.len()
        );

        let batches = self.create_batches(misses);
        let semaphore = Semaphore::new(self.settings.max_concurrent_batches);
        let pb = self.progress_bar(batches.len());

        let batch_futures = batches.into_iter().map(|batch| {
            let semaphore = &semaphore;
            let version = version.as_str();
            let pb = &pb;
            async move {
                let _permit = semaphore.acquire().await.map_err(|_| Error::Cancelled)?;
                let result = self.resolve_batch(batch, version, cancel).await;
                pb.inc(1);
                result
            }
        });

        let waiter_futures = waiting
            .into_iter()
            .map(|(review, pending)| self.await_pending(review, pending, &version, &semaphore, cancel));

        let (batch_results, waiter_results) =
            tokio::join!(join_all(batch_futures), join_all(waiter_futures));
        pb.finish_and_clear();

        for result in batch_results.into_iter().chain(waiter_results) {
            outcome.absorb(result?);
        }

        Ok(outcome)
    }

    fn create_batches(&self, misses: Vec<Claimed>) -> Vec<Vec<Claimed>> {
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(self.settings.batch_size);

        for claimed in misses {
            current.push(claimed);
            if current.len() >= self.settings.batch_size {
                batches.push(std::mem::take(&mut current));
            }
        }

        if !current.is_empty() {
            batches.push(current);
        }

        batches
    }

    /// Waits on another task's computation; if it gave up, claims the key
    /// again and classifies the review alone.
    async fn await_pending(
        &self,
        review: Review,
        mut pending: PendingClassification,
        version: &str,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<ClassifyOutcome> {
        loop {
            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                resolved = pending.wait() => resolved,
            };

            if let Some(classification) = resolved {
                return Ok(ClassifyOutcome::hit(review, classification));
            }

            match self.cache.claim(&review.fingerprint, version) {
                Lookup::Hit(classification) => return Ok(ClassifyOutcome::hit(review, classification)),
                Lookup::Compute(guard) => {
                    let _permit = semaphore.acquire().await.map_err(|_| Error::Cancelled)?;
                    return self.resolve_batch(vec![(review, guard)], version, cancel).await;
                }
                Lookup::Wait(next) => pending = next,
            }
        }
    }

    /// Classifies one batch, splitting it on persistent failure.
    async fn resolve_batch(
        &self,
        batch: Vec<Claimed>,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<ClassifyOutcome> {
        let mut outcome = ClassifyOutcome::default();
        let mut degraded: HashSet<String> = HashSet::new();
        let mut pending = vec![batch];

        while let Some(mut group) = pending.pop() {
            let texts: Vec<String> = group.iter().map(|(r, _)| r.model_text()).collect();
            let mut calls = 0;
            let label = format!("{} batch of {}", self.model.name(), group.len());

            let result = with_retry_when(
                &self.settings.retry,
                self.settings.timeout,
                cancel,
                &label,
                is_transient_model_error,
                || {
                    calls += 1;
                    self.call_model(&texts, version)
                },
            )
            .await;
            outcome.model_calls += calls;

            match result {
                Ok(raw) => {
                    for ((review, guard), raw) in group.into_iter().zip(raw) {
                        let classification = self.validate(raw, &review.fingerprint, version);
                        guard.complete(&self.cache, classification.clone());
                        outcome.results.push(ReviewDetail {
                            review,
                            classification,
                            cached: false,
                        });
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if group.len() > 1 => {
                    tracing::warn!("Batch of {} failed, splitting: {}", group.len(), e);
                    for (review, _) in &group {
                        if degraded.insert(review.fingerprint.clone()) {
                            outcome.warnings.push(Warning::BatchDegraded {
                                fingerprint: review.fingerprint.clone(),
                                batch_size: group.len(),
                                reason: e.to_string(),
                            });
                        }
                    }
                    let second_half = group.split_off(group.len() / 2);
                    pending.push(second_half);
                    pending.push(group);
                }
                Err(e) => {
                    for (review, guard) in group {
                        tracing::warn!("Review {} could not be classified: {}", review.id, e);
                        // sentinels are never cached; waiters retry on their own
                        drop(guard);
                        outcome.unclassified += 1;
                        outcome.warnings.push(Warning::Unclassifiable {
                            fingerprint: review.fingerprint.clone(),
                            reason: e.to_string(),
                        });
                        outcome.results.push(ReviewDetail {
                            classification: Classification::sentinel(&review.fingerprint, version),
                            review,
                            cached: false,
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// One model call. A reply of the wrong length or with an unknown
    /// sentiment fails the whole call.
    async fn call_model(&self, texts: &[String], version: &str) -> Result<Vec<RawClassification>> {
        let raw = self.model.classify(texts, version).await?;

        if raw.len() != texts.len() {
            return Err(Error::Misaligned {
                expected: texts.len(),
                got: raw.len(),
            });
        }

        if let Some(bad) = raw.iter().find(|r| Sentiment::parse(&r.sentiment).is_none()) {
            return Err(Error::ParseError(format!("Unknown sentiment: {:?}", bad.sentiment)));
        }

        Ok(raw)
    }

    fn validate(&self, raw: RawClassification, fingerprint: &str, version: &str) -> Classification {
        Classification {
            fingerprint: fingerprint.to_string(),
            sentiment: Sentiment::parse(&raw.sentiment).unwrap_or(Sentiment::Neutral),
            topics: self.taxonomy.normalize_all(&raw.topics),
            summary: raw.summary.trim().to_string(),
            feature_request: raw
                .feature_request
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            model_version: version.to_string(),
            computed_at: Utc::now(),
        }
    }

    fn progress_bar(&self, batches: usize) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(batches as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
