use std::collections::{BTreeSet, HashMap};

const MAX_TOPIC_CHARS: usize = 48;

/// Folds the free-form topic labels a model produces onto a stable
/// vocabulary so counts aggregate across batches.
pub struct TopicTaxonomy {
    aliases: HashMap<String, String>,
}

impl TopicTaxonomy {
    pub fn new() -> Self {
        let mut taxonomy = Self {
            aliases: HashMap::new(),
        };

        let topics = vec![
            ("user interface", vec!["ui", "ux", "design", "layout", "interface", "user experience"]),
            ("performance", vec!["speed", "slow", "slow loading", "lag", "laggy", "loading"]),
            ("stability", vec!["crash", "crashes", "crashing", "freezes", "freezing"]),
            ("bugs", vec!["bug", "buggy", "glitch", "glitches", "errors"]),
            ("features", vec!["feature", "functionality", "missing features"]),
            ("feature requests", vec!["feature request", "wishlist", "suggestion", "suggestions"]),
            ("login", vec!["sign in", "sign-in", "signin", "authentication", "auth", "account access"]),
            ("notifications", vec!["notification", "push notifications", "alerts"]),
            ("battery", vec!["battery drain", "battery life", "power usage"]),
            ("pricing", vec!["price", "cost", "subscription", "subscriptions", "in-app purchases"]),
            ("customer support", vec!["support", "customer service", "help desk"]),
            ("updates", vec!["update", "latest update", "new version"]),
            ("sync", vec!["syncing", "synchronization", "offline support", "offline"]),
            ("calls", vec!["video calls", "audio", "call quality", "meetings", "video"]),
            ("ease of use", vec!["easy to use", "usability", "intuitive", "simple"]),
            ("reliability", vec!["reliable", "unreliable", "downtime"]),
            ("privacy", vec!["data privacy", "security", "tracking"]),
            ("ads", vec!["ad", "advertising", "advertisements"]),
        ];

        for (name, aliases) in topics {
            taxonomy.add_topic(name, &aliases);
        }

        taxonomy
    }

    fn add_topic(&mut self, name: &str, aliases: &[&str]) {
        self.aliases.insert(name.to_string(), name.to_string());
        for alias in aliases {
            self.aliases.insert(alias.to_string(), name.to_string());
        }
    }

    /// Lower-cases, trims punctuation and whitespace, then maps aliases onto
    /// canonical names. Returns `None` for labels that are empty after cleanup.
    pub fn normalize(&self, label: &str) -> Option<String> {
        let cleaned = label
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if cleaned.is_empty() {
            return None;
        }

        let topic = self.aliases.get(&cleaned).cloned().unwrap_or(cleaned);
        Some(topic.chars().take(MAX_TOPIC_CHARS).collect())
    }

    pub fn normalize_all<'a, I>(&self, labels: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        labels
            .into_iter()
            .filter_map(|l| self.normalize(l))
            .collect()
    }
}

impl Default for TopicTaxonomy {
    fn default() -> Self {
        Self::new()
    }
}
