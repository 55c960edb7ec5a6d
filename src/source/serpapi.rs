use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::RawReview;
use crate::source::provider::{ReviewSource, SourcePage};
use crate::source::rate_limiter::RateLimiter;

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

/// Apple App Store reviews through SerpApi's `apple_reviews` engine.
pub struct SerpApiSource {
    client: Client,
    rate_limiter: RateLimiter,
    api_key: String,
}

#[derive(Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    reviews: Vec<Value>,
    #[serde(default)]
    serpapi_pagination: Option<SerpApiPagination>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct SerpApiPagination {
    #[serde(default)]
    next: Option<String>,
}

impl SerpApiSource {
    pub fn new(api_key: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("reviewlens/0.1"),
        );

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::default(),
            api_key: api_key.to_string(),
        })
    }

    fn into_page(body: SerpApiResponse) -> Result<SourcePage> {
        if let Some(error) = body.error {
            if error.contains(NO_RESULTS_MARKER) {
                return Ok(SourcePage::default());
            }
            return Err(Error::ReviewApi(error));
        }

        let has_more = body
            .serpapi_pagination
            .and_then(|p| p.next)
            .is_some();

        // Entries that do not even deserialize are kept as empty records so
        // the fetcher counts them as malformed.
        let reviews = body
            .reviews
            .into_iter()
            .map(|v| serde_json::from_value::<RawReview>(v).unwrap_or_default())
            .collect();

        Ok(SourcePage { reviews, has_more })
    }
}

#[async_trait]
impl ReviewSource for SerpApiSource {
    async fn search(&self, app_id: &str, page: u32, page_size: u32) -> Result<SourcePage> {
        tracing::debug!("Fetching reviews for {} (page {}, size {})", app_id, page, page_size);

        let page_param = page.to_string();
        let num_param = page_size.to_string();
        let response = self
            .client
            .get(SERPAPI_URL)
            .query(&[
                ("engine", "apple_reviews"),
                ("product_id", app_id),
                ("page", page_param.as_str()),
                ("num", num_param.as_str()),
                ("sort", "mostrecent"),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if let Some(retry_after) = self.rate_limiter.update_from_response(&response).await {
            return Err(Error::RateLimited(retry_after));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ReviewApi(Error::server_error(status, &body)));
        }

        let body: SerpApiResponse = response.json().await?;
        Self::into_page(body)
    }

    async fn throttle(&self) {
        self.rate_limiter.wait().await;
    }

    fn name(&self) -> &str {
        "SerpApi"
    }
}
