use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;

use crate::dedup::normalize_text;
use crate::models::{ranked, AggregateReport, Classification, Review, ReviewDetail, RunStats, Sentiment, Warning};

const EXCERPT_CHARS: usize = 240;
const INSIGHT_LIMIT: usize = 5;

/// Single-pass fold of classified reviews into report statistics.
/// Counters are order-independent; the excerpt sample keeps the last
/// `max_excerpts` reviews added per sentiment.
#[derive(Debug, Clone)]
pub struct Aggregator {
    app_id: String,
    max_excerpts: usize,
    review_count: usize,
    sentiment_counts: BTreeMap<Sentiment, usize>,
    topic_counts: BTreeMap<String, usize>,
    topics_by_sentiment: BTreeMap<Sentiment, BTreeMap<String, usize>>,
    feature_requests: BTreeMap<String, usize>,
    excerpts: BTreeMap<Sentiment, VecDeque<String>>,
    rating_distribution: [usize; 5],
    rating_sum: u64,
}

impl Aggregator {
    pub fn new(app_id: &str, max_excerpts: usize) -> Self {
        Self {
            app_id: app_id.to_string(),
            max_excerpts,
            review_count: 0,
            sentiment_counts: Sentiment::ALL.iter().map(|s| (*s, 0)).collect(),
            topic_counts: BTreeMap::new(),
            topics_by_sentiment: Sentiment::ALL.iter().map(|s| (*s, BTreeMap::new())).collect(),
            feature_requests: BTreeMap::new(),
            excerpts: Sentiment::ALL.iter().map(|s| (*s, VecDeque::new())).collect(),
            rating_distribution: [0; 5],
            rating_sum: 0,
        }
    }

    pub fn add(&mut self, review: &Review, classification: &Classification) {
        self.review_count += 1;
        *self.sentiment_counts.entry(classification.sentiment).or_insert(0) += 1;

        let by_sentiment = self.topics_by_sentiment.entry(classification.sentiment).or_default();
        for topic in &classification.topics {
            *self.topic_counts.entry(topic.clone()).or_insert(0) += 1;
            *by_sentiment.entry(topic.clone()).or_insert(0) += 1;
        }

        if let Some(request) = classification.feature_request.as_deref().and_then(request_key) {
            *self.feature_requests.entry(request).or_insert(0) += 1;
        }

        if (1..=5).contains(&review.rating) {
            self.rating_distribution[(review.rating - 1) as usize] += 1;
            self.rating_sum += review.rating as u64;
        }

        if self.max_excerpts > 0 {
            let bucket = self.excerpts.entry(classification.sentiment).or_default();
            if bucket.len() >= self.max_excerpts {
                bucket.pop_front();
            }
            bucket.push_back(excerpt(&review.text));
        }
    }

    /// Combines a sub-aggregate. Counters add up exactly; excerpts from
    /// `other` are treated as more recent.
    pub fn merge(&mut self, other: Aggregator) {
        self.review_count += other.review_count;
        for (sentiment, count) in other.sentiment_counts {
            *self.sentiment_counts.entry(sentiment).or_insert(0) += count;
        }
        merge_counts(&mut self.topic_counts, other.topic_counts);
        for (sentiment, counts) in other.topics_by_sentiment {
            merge_counts(self.topics_by_sentiment.entry(sentiment).or_default(), counts);
        }
        merge_counts(&mut self.feature_requests, other.feature_requests);
        for (i, count) in other.rating_distribution.iter().enumerate() {
            self.rating_distribution[i] += count;
        }
        self.rating_sum += other.rating_sum;

        for (sentiment, texts) in other.excerpts {
            let bucket = self.excerpts.entry(sentiment).or_default();
            bucket.extend(texts);
            while bucket.len() > self.max_excerpts {
                bucket.pop_front();
            }
        }
    }

    /// Positive counts 1, neutral 0.5, negative 0. An empty fold scores 0.5.
    fn sentiment_score(&self) -> f32 {
        if self.review_count == 0 {
            return 0.5;
        }
        let count = |s: Sentiment| self.sentiment_counts.get(&s).copied().unwrap_or(0) as f32;
        (count(Sentiment::Positive) + 0.5 * count(Sentiment::Neutral)) / self.review_count as f32
    }

    pub fn finish(self, reviews: Vec<ReviewDetail>, warnings: Vec<Warning>, stats: RunStats) -> AggregateReport {
        let rated: usize = self.rating_distribution.iter().sum();
        let average_rating = if rated == 0 {
            0.0
        } else {
            self.rating_sum as f32 / rated as f32
        };

        let sentiment_score = self.sentiment_score();
        let overall_sentiment = if sentiment_score >= 0.6 {
            Sentiment::Positive
        } else if sentiment_score <= 0.4 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        };

        let top = |sentiment: Sentiment| -> Vec<String> {
            self.topics_by_sentiment
                .get(&sentiment)
                .map(|counts| ranked(counts, INSIGHT_LIMIT).into_iter().map(|(t, _)| t.to_string()).collect())
                .unwrap_or_default()
        };
        let common_issues = top(Sentiment::Negative);
        let strengths = top(Sentiment::Positive);
        let feature_requests = ranked(&self.feature_requests, INSIGHT_LIMIT)
            .into_iter()
            .map(|(r, _)| r.to_string())
            .collect();

        AggregateReport {
            app_id: self.app_id,
            review_count: self.review_count,
            sentiment_counts: self.sentiment_counts,
            topic_counts: self.topic_counts,
            sample_excerpts: self
                .excerpts
                .into_iter()
                .map(|(s, texts)| (s, texts.into_iter().collect()))
                .collect(),
            rating_distribution: self.rating_distribution,
            average_rating,
            overall_sentiment,
            sentiment_score,
            topics_by_sentiment: self.topics_by_sentiment,
            common_issues,
            strengths,
            feature_requests,
            generated_at: Utc::now(),
            warnings,
            reviews,
            stats,
        }
    }
}

/// Folds a full result set in one call, oldest review first, so the
/// excerpt sample ends up holding the most recent reviews.
pub fn aggregate(app_id: &str, max_excerpts: usize, details: &[ReviewDetail]) -> Aggregator {
    let mut ordered: Vec<&ReviewDetail> = details.iter().collect();
    ordered.sort_by_key(|d| d.review.posted_at);

    let mut aggregator = Aggregator::new(app_id, max_excerpts);
    for detail in ordered {
        aggregator.add(&detail.review, &detail.classification);
    }
    aggregator
}

fn merge_counts(into: &mut BTreeMap<String, usize>, from: BTreeMap<String, usize>) {
    for (label, count) in from {
        *into.entry(label).or_insert(0) += count;
    }
}

fn request_key(request: &str) -> Option<String> {
    let key = normalize_text(request.trim_matches(|c: char| !c.is_alphanumeric()));
    (!key.is_empty()).then_some(key)
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::fingerprint;
    use chrono::{DateTime, TimeZone};
    use std::collections::BTreeSet;

    fn pair(text: &str, rating: u8, sentiment: Sentiment, topics: &[&str]) -> ReviewDetail {
        dated(text, rating, sentiment, topics, Utc::now())
    }

    fn dated(text: &str, rating: u8, sentiment: Sentiment, topics: &[&str], posted_at: DateTime<Utc>) -> ReviewDetail {
        let fp = fingerprint(text, "author", &posted_at);
        ReviewDetail {
            review: Review {
                id: fp.clone(),
                app_id: "app".to_string(),
                author_handle: "author".to_string(),
                rating,
                title: None,
                text: text.to_string(),
                posted_at,
                source_page: 1,
                fingerprint: fp.clone(),
            },
            classification: Classification {
                fingerprint: fp,
                sentiment,
                topics: topics.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
                summary: String::new(),
                feature_request: None,
                model_version: "v1".to_string(),
                computed_at: Utc::now(),
            },
            cached: false,
        }
    }

    fn sample() -> Vec<ReviewDetail> {
        vec![
            pair("love it", 5, Sentiment::Positive, &["ease of use"]),
            pair("crashes", 1, Sentiment::Negative, &["stability", "bugs"]),
            pair("fine", 3, Sentiment::Neutral, &[]),
            pair("slow", 2, Sentiment::Negative, &["performance", "stability"]),
        ]
    }

    #[test]
    fn test_counts_add_up() {
        let report = aggregate("app", 3, &sample()).finish(Vec::new(), Vec::new(), RunStats::default());

        assert_eq!(report.review_count, 4);
        assert_eq!(report.sentiment_counts.values().sum::<usize>(), report.review_count);
        assert_eq!(report.sentiment_counts[&Sentiment::Negative], 2);
        assert_eq!(report.topic_counts["stability"], 2);
        assert_eq!(report.rating_distribution, [1, 1, 1, 0, 1]);
        assert!((report.average_rating - 2.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_all_sentiments_present() {
        let report = Aggregator::new("app", 3).finish(Vec::new(), Vec::new(), RunStats::default());
        assert_eq!(report.sentiment_counts.len(), 3);
        assert!(report.sentiment_counts.values().all(|c| *c == 0));
    }

    #[test]
    fn test_excerpts_rotate_oldest_out() {
        let details = vec![
            pair("first", 5, Sentiment::Positive, &[]),
            pair("second", 5, Sentiment::Positive, &[]),
            pair("third", 5, Sentiment::Positive, &[]),
        ];
        let report = aggregate("app", 2, &details).finish(Vec::new(), Vec::new(), RunStats::default());
        assert_eq!(report.sample_excerpts[&Sentiment::Positive], vec!["second", "third"]);
    }

    #[test]
    fn test_counters_independent_of_order() {
        let forward = aggregate("app", 3, &sample()).finish(Vec::new(), Vec::new(), RunStats::default());
        let mut reversed_input = sample();
        reversed_input.reverse();
        let reversed = aggregate("app", 3, &reversed_input).finish(Vec::new(), Vec::new(), RunStats::default());

        assert_eq!(forward.sentiment_counts, reversed.sentiment_counts);
        assert_eq!(forward.topic_counts, reversed.topic_counts);
        assert_eq!(forward.rating_distribution, reversed.rating_distribution);
    }

    #[test]
    fn test_merge_matches_sequential_fold() {
        let details = sample();
        let sequential = aggregate("app", 3, &details);

        let mut left = aggregate("app", 3, &details[..2]);
        left.merge(aggregate("app", 3, &details[2..]));

        let a = sequential.finish(Vec::new(), Vec::new(), RunStats::default());
        let b = left.finish(Vec::new(), Vec::new(), RunStats::default());
        assert_eq!(a.review_count, b.review_count);
        assert_eq!(a.sentiment_counts, b.sentiment_counts);
        assert_eq!(a.topic_counts, b.topic_counts);
        assert_eq!(a.sample_excerpts, b.sample_excerpts);
    }

    #[test]
    fn test_long_excerpt_truncated() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS + 1);
    }

    #[test]
    fn test_excerpts_keep_newest_regardless_of_input_order() {
        let newest = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let oldest = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        // fetched most-recent first
        let details = vec![
            dated("love newest", 5, Sentiment::Positive, &[], newest),
            dated("love oldest", 5, Sentiment::Positive, &[], oldest),
        ];

        let report = aggregate("app", 1, &details).finish(Vec::new(), Vec::new(), RunStats::default());
        assert_eq!(report.sample_excerpts[&Sentiment::Positive], vec!["love newest"]);
    }

    #[test]
    fn test_insights_split_by_sentiment() {
        let mut details = sample();
        details.push(pair("more crashes", 1, Sentiment::Negative, &["stability"]));
        details[0].classification.feature_request = Some("Dark mode!".to_string());
        details[1].classification.feature_request = Some("dark   mode".to_string());
        details[2].classification.feature_request = Some("offline support".to_string());

        let report = aggregate("app", 3, &details).finish(Vec::new(), Vec::new(), RunStats::default());

        assert_eq!(report.common_issues, vec!["stability", "bugs", "performance"]);
        assert_eq!(report.strengths, vec!["ease of use"]);
        assert_eq!(report.feature_requests, vec!["dark mode", "offline support"]);
        assert_eq!(report.topics_by_sentiment[&Sentiment::Negative]["stability"], 3);
        // 1 positive, 1 neutral, 3 negative
        assert!((report.sentiment_score - 0.3).abs() < 1e-6);
        assert_eq!(report.overall_sentiment, Sentiment::Negative);
    }

    #[test]
    fn test_empty_fold_is_neutral() {
        let report = Aggregator::new("app", 3).finish(Vec::new(), Vec::new(), RunStats::default());
        assert_eq!(report.overall_sentiment, Sentiment::Neutral);
        assert!((report.sentiment_score - 0.5).abs() < f32::EPSILON);
        assert!(report.common_issues.is_empty());
    }
}
