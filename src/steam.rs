//! Rate-limited Steam storefront client.
//!
//! Three endpoints are consumed: the public app list, per-app details
//! (`appdetails`), and per-app review aggregates (`appreviews`). All
//! traffic flows through a semaphore-bounded concurrency gate plus a
//! sliding-window limiter that keeps the client under Steam's ~200
//! requests per 5 minutes, and transient failures are retried under an
//! explicit [`RetryPolicy`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Network(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::RateLimited { .. } => true,
            FetchError::Status(code) => *code >= 500,
            FetchError::Network(_) | FetchError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Retry schedule for a single logical request: capped exponential
/// backoff with jitter, overridable by an upstream `Retry-After`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). Jitter keeps the
    /// result within [cap/2, cap] once the exponential curve saturates.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let capped = exp.clamp(self.base.as_secs_f64(), self.cap.as_secs_f64());
        Duration::from_secs_f64(rng.gen_range((capped / 2.0)..=capped))
    }
}

/// Sliding-window request limiter. Tracks the timestamps of recent
/// requests and makes callers wait until a slot in the window frees up.
struct RequestWindow {
    max_requests: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RequestWindow {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                if let Some(cutoff) = now.checked_sub(self.window) {
                    while stamps.front().is_some_and(|t| *t <= cutoff) {
                        stamps.pop_front();
                    }
                }
                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    None
                } else {
                    // Oldest stamp leaving the window frees the next slot.
                    let oldest = *stamps.front().unwrap();
                    Some((oldest + self.window).saturating_duration_since(now))
                }
            };
            match wait {
                None => return,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "request window full; waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// -------- typed response models --------

#[derive(Debug, Deserialize)]
struct AppListResponse {
    applist: AppListBody,
}

#[derive(Debug, Deserialize)]
struct AppListBody {
    apps: Vec<AppEntry>,
}

/// One id+name pair from the catalog listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AppEntry {
    pub appid: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<AppDetails>,
}

/// Validated per-app document from the details endpoint. Absent fields
/// deserialize to their empty/None forms; downstream code never touches
/// raw JSON maps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetails {
    pub steam_appid: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub developers: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub genres: Vec<Descriptor>,
    #[serde(default)]
    pub categories: Vec<Descriptor>,
    pub price_overview: Option<PriceOverview>,
    pub release_date: Option<ReleaseDate>,
    pub platforms: Option<Platforms>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Descriptor {
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceOverview {
    pub currency: Option<String>,
    pub initial: Option<i64>,
    #[serde(rename = "final")]
    pub final_price: Option<i64>,
    pub discount_percent: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseDate {
    pub date: Option<String>,
    #[serde(default)]
    pub coming_soon: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Platforms {
    #[serde(default)]
    pub windows: bool,
    #[serde(default)]
    pub mac: bool,
    #[serde(default)]
    pub linux: bool,
}

/// Outcome of a details fetch once the envelope has been validated.
#[derive(Debug)]
pub enum DetailsOutcome {
    Found(Box<AppDetails>),
    /// The endpoint answered but had nothing usable (success=false,
    /// missing entry, delisted app). Not an error; the caller skips.
    Unavailable(&'static str),
}

/// Review aggregate for one app. Defaults to all-zero counts so a failed
/// review fetch degrades instead of discarding the primary record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewSummary {
    #[serde(default)]
    pub total_positive: i32,
    #[serde(default)]
    pub total_negative: i32,
    #[serde(default)]
    pub total_reviews: i32,
    #[serde(default)]
    pub review_score: i32,
    #[serde(default)]
    pub review_score_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewsEnvelope {
    #[serde(default)]
    success: i64,
    query_summary: Option<ReviewSummary>,
}

// -------- client --------

pub struct SteamClient {
    client: Client,
    gate: Arc<Semaphore>,
    window: RequestWindow,
    retry: RetryPolicy,
    store_base: String,
    catalog_base: String,
}

impl SteamClient {
    pub fn new(cfg: &FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            gate: Arc::new(Semaphore::new(cfg.max_concurrency.max(1))),
            window: RequestWindow::new(cfg.max_requests_per_window, cfg.window),
            retry: RetryPolicy {
                max_attempts: cfg.max_attempts.max(1),
                base: cfg.backoff_base,
                cap: cfg.backoff_cap,
            },
            store_base: cfg.store_base.trim_end_matches('/').to_string(),
            catalog_base: cfg.catalog_base.trim_end_matches('/').to_string(),
        }
    }

    /// Full catalog listing (id+name pairs).
    pub async fn list_apps(&self) -> Result<Vec<AppEntry>, FetchError> {
        let url = format!("{}/ISteamApps/GetAppList/v2", self.catalog_base);
        let body = self.get_json(&url, &[]).await?;
        let parsed: AppListResponse =
            serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(parsed.applist.apps)
    }

    /// Per-app details, keyed in the response by the stringified app id.
    pub async fn app_details(&self, app_id: i64) -> Result<DetailsOutcome, FetchError> {
        let url = format!("{}/appdetails", self.store_base);
        let id = app_id.to_string();
        let query = [
            ("appids", id.as_str()),
            ("l", "english"),
            ("cc", "us"),
        ];
        let body = self.get_json(&url, &query).await?;
        let Some(entry) = body.get(&id) else {
            return Ok(DetailsOutcome::Unavailable("missing envelope entry"));
        };
        let envelope: DetailsEnvelope = serde_json::from_value(entry.clone())
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        if !envelope.success {
            return Ok(DetailsOutcome::Unavailable("success=false"));
        }
        match envelope.data {
            Some(details) => Ok(DetailsOutcome::Found(Box::new(details))),
            None => Ok(DetailsOutcome::Unavailable("empty data")),
        }
    }

    /// Review aggregate; statistics only, no review bodies.
    pub async fn app_reviews(&self, app_id: i64) -> Result<ReviewSummary, FetchError> {
        let url = format!("{}/appreviews/{}", self.store_base, app_id);
        let query = [
            ("json", "1"),
            ("language", "all"),
            ("review_type", "all"),
            ("purchase_type", "all"),
            ("num_per_page", "0"),
        ];
        let body = self.get_json(&url, &query).await?;
        let envelope: ReviewsEnvelope =
            serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))?;
        if envelope.success != 1 {
            return Ok(ReviewSummary::default());
        }
        Ok(envelope.query_summary.unwrap_or_default())
    }

    /// GET with retry: each attempt takes a concurrency permit and a
    /// window slot; transient failures back off per the retry policy.
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            self.window.acquire().await;
            let _permit = self.gate.acquire().await.expect("fetch gate closed");
            let result = self.attempt(url, query).await;
            drop(_permit);
            match result {
                Ok(body) => return Ok(body),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let mut delay = self.retry.delay(attempt, &mut rand::thread_rng());
                    if let FetchError::RateLimited {
                        retry_after: Some(secs),
                    } = err
                    {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient fetch failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let mut req = self.client.get(url).header("Accept", "application/json");
        if !query.is_empty() {
            req = req.query(&query);
        }
        let resp = req.send().await.map_err(FetchError::from)?;
        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn test_config(server: &MockServer) -> FetchConfig {
        FetchConfig {
            max_concurrency: 4,
            max_requests_per_window: 100,
            window: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_millis(4),
            backoff_cap: Duration::from_millis(10),
            store_base: server.uri(),
            catalog_base: server.uri(),
        }
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(4),
            cap: Duration::from_secs(10),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..6 {
            let d = policy.delay(attempt, &mut rng);
            assert!(d >= Duration::from_secs(2), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_secs(10), "attempt {attempt}: {d:?}");
        }
        // Once saturated the delay stays in the top half of the cap.
        let d = policy.delay(5, &mut rng);
        assert!(d >= Duration::from_secs(5));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::RateLimited { retry_after: None }.is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::Decode("bad".into()).is_transient());
    }

    /// Responds 429 twice, then 200 with the given body.
    struct FlakyThenOk {
        hits: std::sync::atomic::AtomicU32,
        body: Value,
    }

    impl Respond for FlakyThenOk {
        fn respond(&self, _req: &Request) -> ResponseTemplate {
            let n = self
                .hits
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < 2 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_json(self.body.clone())
            }
        }
    }

    #[tokio::test]
    async fn rate_limit_then_success_is_recovered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appreviews/42"))
            .respond_with(FlakyThenOk {
                hits: Default::default(),
                body: json!({
                    "success": 1,
                    "query_summary": {
                        "total_positive": 90,
                        "total_negative": 10,
                        "total_reviews": 100
                    }
                }),
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = SteamClient::new(&test_config(&server));
        let summary = client.app_reviews(42).await.expect("third attempt succeeds");
        assert_eq!(summary.total_positive, 90);
        assert_eq!(summary.total_reviews, 100);
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appdetails"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = SteamClient::new(&test_config(&server));
        let err = client.app_details(42).await.expect_err("retries exhausted");
        assert!(matches!(err, FetchError::Status(503)));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appdetails"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = SteamClient::new(&test_config(&server));
        let err = client.app_details(42).await.expect_err("404 surfaces");
        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn details_envelope_is_parsed_into_typed_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appdetails"))
            .and(query_param("appids", "413150"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "413150": {
                    "success": true,
                    "data": {
                        "steam_appid": 413150,
                        "name": "Stardew Valley",
                        "type": "game",
                        "is_free": false,
                        "developers": ["ConcernedApe"],
                        "publishers": ["ConcernedApe"],
                        "genres": [{"id": "23", "description": "Indie"}],
                        "categories": [{"id": "2", "description": "Single-player"}],
                        "price_overview": {
                            "currency": "USD",
                            "initial": 1499,
                            "final": 1499,
                            "discount_percent": 0
                        },
                        "release_date": {"coming_soon": false, "date": "26 Feb, 2016"},
                        "platforms": {"windows": true, "mac": true, "linux": true}
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = SteamClient::new(&test_config(&server));
        let outcome = client.app_details(413150).await.unwrap();
        let DetailsOutcome::Found(details) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(details.name.as_deref(), Some("Stardew Valley"));
        assert_eq!(details.kind.as_deref(), Some("game"));
        assert_eq!(details.developers, vec!["ConcernedApe"]);
        assert_eq!(
            details.price_overview.as_ref().and_then(|p| p.final_price),
            Some(1499)
        );
        assert!(details.platforms.map(|p| p.linux).unwrap_or(false));
    }

    #[tokio::test]
    async fn unsuccessful_details_are_a_skip_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/appdetails"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"42": {"success": false}})),
            )
            .mount(&server)
            .await;

        let client = SteamClient::new(&test_config(&server));
        let outcome = client.app_details(42).await.unwrap();
        assert!(matches!(outcome, DetailsOutcome::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn window_limiter_delays_excess_requests() {
        let window = RequestWindow::new(2, Duration::from_secs(60));
        let start = Instant::now();
        window.acquire().await;
        window.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        // Third acquire has to wait for the first stamp to expire.
        window.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
