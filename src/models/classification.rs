use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNCLASSIFIED_TOPIC: &str = "unclassified";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative];

    /// Lenient parse of a model-provided label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "positive" | "pos" => Some(Sentiment::Positive),
            "neutral" | "mixed" => Some(Sentiment::Neutral),
            "negative" | "neg" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

/// One entry of a model response, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawClassification {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub feature_request: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub fingerprint: String,
    pub sentiment: Sentiment,
    pub topics: BTreeSet<String>,
    pub summary: String,
    /// Functionality the reviewer asks for, if any.
    #[serde(default)]
    pub feature_request: Option<String>,
    pub model_version: String,
    pub computed_at: DateTime<Utc>,
}

impl Classification {
    /// Placeholder for a review the model could not classify even on its own.
    pub fn sentinel(fingerprint: &str, model_version: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            sentiment: Sentiment::Neutral,
            topics: BTreeSet::from([UNCLASSIFIED_TOPIC.to_string()]),
            summary: String::new(),
            feature_request: None,
            model_version: model_version.to_string(),
            computed_at: Utc::now(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentiment == Sentiment::Neutral
            && self.topics.len() == 1
            && self.topics.contains(UNCLASSIFIED_TOPIC)
    }

    /// Content equality, ignoring when it was computed.
    pub fn same_content(&self, other: &Classification) -> bool {
        self.fingerprint == other.fingerprint
            && self.model_version == other.model_version
            && self.sentiment == other.sentiment
            && self.topics == other.topics
            && self.summary == other.summary
            && self.feature_request == other.feature_request
    }
}
