use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::Review;

/// Lower-cases and collapses runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable identity of a review: SHA-256 over normalized text, author handle
/// and the posting day. Source-API ids are not involved.
pub fn fingerprint(text: &str, author_handle: &str, posted_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update([0x1f]);
    hasher.update(author_handle.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(posted_at.format("%Y-%m-%d").to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Drops reviews whose fingerprint was already seen. First occurrence wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    dropped: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the review if it is new, `None` if it is a duplicate.
    pub fn admit(&mut self, review: Review) -> Option<Review> {
        if self.seen.insert(review.fingerprint.clone()) {
            Some(review)
        } else {
            tracing::debug!(
                "Dropping duplicate review {} from page {}",
                review.id,
                review.source_page
            );
            self.dropped += 1;
            None
        }
    }

    pub fn dedupe<'a, I>(&'a mut self, reviews: I) -> impl Iterator<Item = Review> + 'a
    where
        I: IntoIterator<Item = Review>,
        I::IntoIter: 'a,
    {
        reviews.into_iter().filter_map(move |r| self.admit(r))
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.dropped
    }

    pub fn distinct(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn review(id: &str, text: &str, author: &str, posted_at: DateTime<Utc>) -> Review {
        Review {
            id: id.to_string(),
            app_id: "app".to_string(),
            author_handle: author.to_string(),
            rating: 5,
            title: None,
            text: text.to_string(),
            posted_at,
            source_page: 1,
            fingerprint: fingerprint(text, author, &posted_at),
        }
    }

    #[test]
    fn test_normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_text("  Great   APP\n\tok "), "great app ok");
    }

    #[test]
    fn test_fingerprint_ignores_time_of_day() {
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();

        assert_eq!(
            fingerprint("Great app", "sam", &morning),
            fingerprint("great  app", "sam", &evening)
        );
        assert_ne!(
            fingerprint("Great app", "sam", &morning),
            fingerprint("Great app", "sam", &next_day)
        );
        assert_ne!(
            fingerprint("Great app", "sam", &morning),
            fingerprint("Great app", "alex", &morning)
        );
    }

    #[test]
    fn test_same_review_twice_yields_one() {
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut dedup = Deduplicator::new();

        let out: Vec<_> = dedup
            .dedupe(vec![
                review("1", "Great app", "sam", day),
                review("", "great app", "sam", day),
                review("3", "Crashes constantly", "sam", day),
            ])
            .collect();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "1");
        assert_eq!(dedup.duplicates_dropped(), 1);
        assert_eq!(dedup.distinct(), 2);
    }

    #[test]
    fn test_state_spans_calls() {
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut dedup = Deduplicator::new();

        assert!(dedup.admit(review("1", "Nice", "a", day)).is_some());
        assert!(dedup.admit(review("2", "NICE", "a", day)).is_none());
    }
}
