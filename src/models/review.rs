use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dedup::fingerprint;

/// A review entry exactly as the search API returned it. Every field is
/// optional because the upstream shape is not guaranteed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReview {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rating: Option<Value>,
    #[serde(default)]
    pub review_date: Option<String>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub id: String,
    pub app_id: String,
    pub author_handle: String,
    pub rating: u8,
    pub title: Option<String>,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    pub source_page: u32,
    pub fingerprint: String,
}

/// Why a raw entry could not become a `Review`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReview {
    MissingText,
    MissingAuthor,
    InvalidRating(String),
    InvalidDate(String),
}

impl std::fmt::Display for InvalidReview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReview::MissingText => write!(f, "missing review text"),
            InvalidReview::MissingAuthor => write!(f, "missing author"),
            InvalidReview::InvalidRating(r) => write!(f, "invalid rating: {}", r),
            InvalidReview::InvalidDate(d) => write!(f, "invalid date: {}", d),
        }
    }
}

impl Review {
    pub fn from_raw(raw: RawReview, app_id: &str, page: u32) -> Result<Self, InvalidReview> {
        let text = raw
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(InvalidReview::MissingText)?
            .to_string();

        let author_handle = raw
            .author
            .as_ref()
            .and_then(|a| a.name.as_deref().or(a.author_id.as_deref()))
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(InvalidReview::MissingAuthor)?
            .to_string();

        let rating = parse_rating(raw.rating.as_ref())?;

        let date = raw.review_date.as_deref().unwrap_or("");
        let posted_at = parse_date(date).ok_or_else(|| InvalidReview::InvalidDate(date.to_string()))?;

        let fingerprint = fingerprint(&text, &author_handle, &posted_at);

        let id = match raw.id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => fingerprint.clone(),
        };

        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            id,
            app_id: app_id.to_string(),
            author_handle,
            rating,
            title,
            text,
            posted_at,
            source_page: page,
            fingerprint,
        })
    }

    /// Text handed to the classification model.
    pub fn model_text(&self) -> String {
        match &self.title {
            Some(title) => format!("{}. {}", title, self.text),
            None => self.text.clone(),
        }
    }
}

fn parse_rating(value: Option<&Value>) -> Result<u8, InvalidReview> {
    let rating = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match rating {
        Some(r) if r.fract() == 0.0 && (1.0..=5.0).contains(&r) => Ok(r as u8),
        _ => Err(InvalidReview::InvalidRating(
            value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string()),
        )),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d", "%b %d, %Y", "%B %d, %Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}
