use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::{Classification, Sentiment};
use super::review::Review;

/// Non-fatal condition recorded during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    PartialFetch { page: u32, reason: String },
    BatchDegraded { fingerprint: String, batch_size: usize, reason: String },
    Unclassifiable { fingerprint: String, reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::PartialFetch { page, reason } => {
                write!(f, "PartialFetch: stopped at page {}: {}", page, reason)
            }
            Warning::BatchDegraded { fingerprint, batch_size, reason } => write!(
                f,
                "BatchDegraded: review {} was split out of a batch of {}: {}",
                short(fingerprint),
                batch_size,
                reason
            ),
            Warning::Unclassifiable { fingerprint, reason } => write!(
                f,
                "Unclassifiable: review {} marked unclassified: {}",
                short(fingerprint),
                reason
            ),
        }
    }
}

/// Labels by descending count, ties broken alphabetically.
pub fn ranked(counts: &BTreeMap<String, usize>, limit: usize) -> Vec<(&str, usize)> {
    let mut labels: Vec<_> = counts.iter().map(|(l, c)| (l.as_str(), *c)).collect();
    labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    labels.truncate(limit);
    labels
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..12.min(fingerprint.len())]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDetail {
    pub review: Review,
    pub classification: Classification,
    pub cached: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub pages_fetched: u32,
    pub malformed_skipped: usize,
    pub duplicates_dropped: usize,
    pub cache_hits: usize,
    pub model_calls: usize,
    pub unclassified: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub app_id: String,
    pub review_count: usize,
    pub sentiment_counts: BTreeMap<Sentiment, usize>,
    pub topic_counts: BTreeMap<String, usize>,
    pub sample_excerpts: BTreeMap<Sentiment, Vec<String>>,
    /// Index 0 holds one-star reviews.
    pub rating_distribution: [usize; 5],
    pub average_rating: f32,
    pub overall_sentiment: Sentiment,
    /// 0.0 when every review is negative, 1.0 when every review is positive.
    pub sentiment_score: f32,
    pub topics_by_sentiment: BTreeMap<Sentiment, BTreeMap<String, usize>>,
    /// Most frequent topics of negative reviews.
    pub common_issues: Vec<String>,
    /// Most frequent topics of positive reviews.
    pub strengths: Vec<String>,
    pub feature_requests: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub warnings: Vec<Warning>,
    pub reviews: Vec<ReviewDetail>,
    pub stats: RunStats,
}

impl AggregateReport {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }

    /// Topics ordered by descending count, ties broken alphabetically.
    pub fn top_topics(&self, limit: usize) -> Vec<(&str, usize)> {
        ranked(&self.topic_counts, limit)
    }

    pub fn has_partial_fetch(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::PartialFetch { .. }))
    }
}
