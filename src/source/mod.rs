pub mod provider;
pub mod serpapi;
pub mod rate_limiter;
pub mod fetcher;

pub use provider::{ReviewSource, SourcePage};
pub use serpapi::SerpApiSource;
pub use rate_limiter::RateLimiter;
pub use fetcher::{FetchItem, ReviewFetcher};
