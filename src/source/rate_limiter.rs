use std::sync::Arc;
use std::time::Instant;

use reqwest::Response;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Soft per-minute request ceiling plus a hard pause after the API
/// answers with `Retry-After`.
pub struct RateLimiter {
    state: Arc<Mutex<RateLimitState>>,
    requests_per_minute: u32,
}

struct RateLimitState {
    blocked_until: Option<Instant>,
    requests_this_minute: u32,
    minute_start: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimitState {
                blocked_until: None,
                requests_this_minute: 0,
                minute_start: Instant::now(),
            })),
            requests_per_minute: requests_per_minute.max(1),
        }
    }

    pub async fn wait(&self) {
        let mut state = self.state.lock().await;

        if let Some(until) = state.blocked_until {
            let now = Instant::now();
            if until > now {
                let wait_duration = until - now;
                drop(state);
                tracing::info!("Rate limited, waiting {:?}", wait_duration);
                sleep(wait_duration).await;
                state = self.state.lock().await;
            }
            state.blocked_until = None;
        }

        let minute_elapsed = state.minute_start.elapsed();
        if minute_elapsed < Duration::from_secs(60) {
            if state.requests_this_minute >= self.requests_per_minute {
                let wait_time = Duration::from_secs(60) - minute_elapsed;
                drop(state);
                tracing::debug!("Soft rate limiting, waiting {:?}", wait_time);
                sleep(wait_time).await;
                state = self.state.lock().await;
                state.requests_this_minute = 0;
                state.minute_start = Instant::now();
            }
        } else {
            state.requests_this_minute = 0;
            state.minute_start = Instant::now();
        }

        state.requests_this_minute += 1;
    }

    /// Returns the `Retry-After` delay in seconds when the response is a 429.
    pub async fn update_from_response(&self, response: &Response) -> Option<u64> {
        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return None;
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(60);

        self.block_for(Duration::from_secs(retry_after)).await;
        Some(retry_after)
    }

    pub async fn block_for(&self, duration: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + duration;
        state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(30)
    }
}
