//! Runtime configuration.
//!
//! Everything tunable is resolved here, once, from the environment (after
//! dotenv), and handed to the rest of the crate as immutable structs. No
//! other module reads env vars.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::classifier::ClassifierRules;

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

/// Tuning for the rate-limited Steam fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum in-flight requests; callers beyond this suspend.
    pub max_concurrency: usize,
    /// Sliding-window request ceiling (Steam allows ~200 per 5 minutes).
    pub max_requests_per_window: usize,
    pub window: Duration,
    pub request_timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub store_base: String,
    pub catalog_base: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_requests_per_window: 200,
            window: Duration::from_secs(300),
            request_timeout: Duration::from_secs(20),
            max_attempts: 3,
            backoff_base: Duration::from_secs(4),
            backoff_cap: Duration::from_secs(10),
            store_base: "https://store.steampowered.com/api".into(),
            catalog_base: "https://api.steampowered.com".into(),
        }
    }
}

/// Tuning for a collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Upper bound on candidates fetched per run.
    pub target_count: usize,
    /// Candidates processed per fan-out wave.
    pub batch_size: usize,
    /// Consecutive fetch failures treated as a catalog outage.
    pub outage_threshold: usize,
    /// Pause between fan-out waves, on top of the request window.
    pub batch_pause: Duration,
    /// Soft deadline; no new fetches are issued once it passes.
    pub max_runtime: Option<Duration>,
    /// Hand-curated app ids that prime selection on a fresh database;
    /// like any candidate, a seed already in raw storage is skipped.
    pub seed_ids: Vec<i64>,
    /// Name keywords that bias candidate selection toward indie titles.
    pub keywords: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            target_count: 100,
            batch_size: 25,
            outage_threshold: 10,
            batch_pause: Duration::from_secs(1),
            max_runtime: None,
            seed_ids: vec![
                413150, // Stardew Valley
                250900, // The Binding of Isaac: Rebirth
                105600, // Terraria
                211820, // Starbound
                367520, // Hollow Knight
                391540, // Undertale
                257350, // Hyper Light Drifter
                447040, // A Hat in Time
                268910, // Cuphead
                387290, // Ori and the Blind Forest
                593110, // Dead Cells
                588650, // Subnautica
            ],
            keywords: [
                "indie",
                "independent",
                "pixel",
                "retro",
                "adventure",
                "casual",
                "puzzle",
                "platformer",
                "roguelike",
                "survival",
                "crafting",
                "sandbox",
                "exploration",
                "story",
                "narrative",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Top-level configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_conns: u32,
    pub fetch: FetchConfig,
    pub collector: CollectorConfig,
    pub rules: ClassifierRules,
    pub insight_endpoint: Option<String>,
    pub insight_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let Some(database_url) = env_str("DATABASE_URL") else {
            bail!("DATABASE_URL not configured");
        };

        let mut fetch = FetchConfig::default();
        fetch.max_concurrency = env_usize("FETCH_MAX_CONCURRENCY", fetch.max_concurrency);
        fetch.max_requests_per_window =
            env_usize("FETCH_WINDOW_REQUESTS", fetch.max_requests_per_window);
        fetch.window = Duration::from_secs(env_u64("FETCH_WINDOW_SECS", fetch.window.as_secs()));
        fetch.request_timeout = Duration::from_secs(env_u64(
            "FETCH_REQUEST_TIMEOUT_SECS",
            fetch.request_timeout.as_secs(),
        ));
        fetch.max_attempts = env_u32("FETCH_MAX_ATTEMPTS", fetch.max_attempts);
        fetch.backoff_base =
            Duration::from_secs(env_u64("FETCH_BACKOFF_BASE_SECS", fetch.backoff_base.as_secs()));
        fetch.backoff_cap =
            Duration::from_secs(env_u64("FETCH_BACKOFF_CAP_SECS", fetch.backoff_cap.as_secs()));
        if let Some(base) = env_str("STEAM_STORE_BASE") {
            fetch.store_base = base;
        }
        if let Some(base) = env_str("STEAM_CATALOG_BASE") {
            fetch.catalog_base = base;
        }

        let mut collector = CollectorConfig::default();
        collector.target_count = env_usize("COLLECT_TARGET", collector.target_count);
        collector.batch_size = env_usize("COLLECT_BATCH_SIZE", collector.batch_size);
        collector.outage_threshold =
            env_usize("COLLECT_OUTAGE_THRESHOLD", collector.outage_threshold);
        collector.batch_pause = Duration::from_secs(env_u64(
            "COLLECT_BATCH_PAUSE_SECS",
            collector.batch_pause.as_secs(),
        ));
        collector.max_runtime = std::env::var("COLLECT_MAX_RUNTIME_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let mut rules = ClassifierRules::default();
        rules.genre_signal_threshold =
            env_usize("INDIE_GENRE_SIGNAL_THRESHOLD", rules.genre_signal_threshold);

        Ok(Self {
            database_url,
            db_max_conns: env_u32("DB_MAX_CONNS", 10),
            fetch,
            collector,
            rules,
            insight_endpoint: env_str("INSIGHT_ENDPOINT"),
            insight_timeout: Duration::from_secs(env_u64("INSIGHT_TIMEOUT_SECS", 30)),
        })
    }
}
