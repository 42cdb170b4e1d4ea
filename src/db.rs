//! Postgres access: pool construction, schema bootstrap, and the raw
//! `games` table owned by the collector.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

use crate::steam::{AppDetails, ReviewSummary};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Creates the raw and normalized tables plus indexes if absent.
    /// Every statement is IF NOT EXISTS, so repeated startup is harmless.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .persistent(false)
                .execute(&self.pool)
                .await?;
        }
        info!("schema ensured");
        Ok(())
    }

    /// App ids already present in raw storage; used for dedup before
    /// any fetch is issued.
    pub async fn existing_app_ids(&self) -> Result<HashSet<i64>> {
        let rows = sqlx::query("SELECT app_id FROM games")
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("app_id")).collect())
    }

    /// Insert-or-update keyed by app id. A re-fetch refreshes the name,
    /// review counts and updated_at; everything else keeps its first
    /// landed value.
    pub async fn upsert_game(&self, game: &RawGame) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (
                app_id, name, type, is_free,
                price_currency, price_initial, price_final, price_discount_percent,
                release_date_text, release_date_coming_soon,
                platforms_windows, platforms_mac, platforms_linux,
                genres, categories, developers, publishers,
                positive_reviews, negative_reviews, total_reviews,
                review_score, review_score_desc, updated_at
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8,
                $9, $10,
                $11, $12, $13,
                $14, $15, $16, $17,
                $18, $19, $20,
                $21, $22, now()
            )
            ON CONFLICT (app_id) DO UPDATE SET
                name = EXCLUDED.name,
                positive_reviews = EXCLUDED.positive_reviews,
                negative_reviews = EXCLUDED.negative_reviews,
                total_reviews = EXCLUDED.total_reviews,
                review_score = EXCLUDED.review_score,
                review_score_desc = EXCLUDED.review_score_desc,
                updated_at = now()
            "#,
        )
        .persistent(false)
        .bind(game.app_id)
        .bind(&game.name)
        .bind(&game.kind)
        .bind(game.is_free)
        .bind(&game.price_currency)
        .bind(game.price_initial)
        .bind(game.price_final)
        .bind(game.price_discount_percent)
        .bind(&game.release_date_text)
        .bind(game.release_date_coming_soon)
        .bind(game.platforms_windows)
        .bind(game.platforms_mac)
        .bind(game.platforms_linux)
        .bind(&game.genres)
        .bind(&game.categories)
        .bind(&game.developers)
        .bind(&game.publishers)
        .bind(game.positive_reviews)
        .bind(game.negative_reviews)
        .bind(game.total_reviews)
        .bind(game.review_score)
        .bind(&game.review_score_desc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn raw_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .persistent(false)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Timestamp of the most recent raw write; None while the table is
    /// empty.
    pub async fn last_refresh(&self) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(updated_at) FROM games")
                .persistent(false)
                .fetch_one(&self.pool)
                .await?;
        Ok(ts)
    }
}

/// One denormalized row bound for the raw `games` table.
#[derive(Debug, Clone)]
pub struct RawGame {
    pub app_id: i64,
    pub name: String,
    pub kind: Option<String>,
    pub is_free: bool,
    pub price_currency: Option<String>,
    pub price_initial: Option<i64>,
    pub price_final: Option<i64>,
    pub price_discount_percent: Option<i32>,
    pub release_date_text: Option<String>,
    pub release_date_coming_soon: bool,
    pub platforms_windows: bool,
    pub platforms_mac: bool,
    pub platforms_linux: bool,
    pub genres: Vec<String>,
    pub categories: Vec<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub positive_reviews: i32,
    pub negative_reviews: i32,
    pub total_reviews: i32,
    pub review_score: i32,
    pub review_score_desc: Option<String>,
}

impl RawGame {
    /// Merges the primary details document with the (possibly defaulted)
    /// review aggregate into one storable row.
    pub fn from_details(app_id: i64, details: &AppDetails, reviews: &ReviewSummary) -> Self {
        let price = details.price_overview.as_ref();
        let release = details.release_date.as_ref();
        let platforms = details.platforms.unwrap_or_default();
        Self {
            app_id,
            name: details.name.clone().unwrap_or_default(),
            kind: details.kind.clone(),
            is_free: details.is_free,
            price_currency: price.and_then(|p| p.currency.clone()),
            price_initial: price.and_then(|p| p.initial),
            price_final: price.and_then(|p| p.final_price),
            price_discount_percent: price.and_then(|p| p.discount_percent),
            release_date_text: release.and_then(|r| r.date.clone()),
            release_date_coming_soon: release.map(|r| r.coming_soon).unwrap_or(false),
            platforms_windows: platforms.windows,
            platforms_mac: platforms.mac,
            platforms_linux: platforms.linux,
            genres: collect_descriptions(&details.genres),
            categories: collect_descriptions(&details.categories),
            developers: details.developers.clone(),
            publishers: details.publishers.clone(),
            positive_reviews: reviews.total_positive,
            negative_reviews: reviews.total_negative,
            total_reviews: reviews.total_reviews,
            review_score: reviews.review_score,
            review_score_desc: reviews.review_score_desc.clone(),
        }
    }
}

fn collect_descriptions(items: &[crate::steam::Descriptor]) -> Vec<String> {
    items
        .iter()
        .filter_map(|d| d.description.clone())
        .filter(|d| !d.trim().is_empty())
        .collect()
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS games (
        app_id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT,
        is_free BOOLEAN NOT NULL DEFAULT FALSE,
        price_currency TEXT,
        price_initial BIGINT,
        price_final BIGINT,
        price_discount_percent INTEGER,
        release_date_text TEXT,
        release_date_coming_soon BOOLEAN NOT NULL DEFAULT FALSE,
        platforms_windows BOOLEAN NOT NULL DEFAULT FALSE,
        platforms_mac BOOLEAN NOT NULL DEFAULT FALSE,
        platforms_linux BOOLEAN NOT NULL DEFAULT FALSE,
        genres TEXT[] NOT NULL DEFAULT '{}',
        categories TEXT[] NOT NULL DEFAULT '{}',
        developers TEXT[] NOT NULL DEFAULT '{}',
        publishers TEXT[] NOT NULL DEFAULT '{}',
        positive_reviews INTEGER NOT NULL DEFAULT 0,
        negative_reviews INTEGER NOT NULL DEFAULT 0,
        total_reviews INTEGER NOT NULL DEFAULT 0,
        review_score INTEGER NOT NULL DEFAULT 0,
        review_score_desc TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_games_name ON games(name)",
    "CREATE INDEX IF NOT EXISTS idx_games_type ON games(type)",
    "CREATE INDEX IF NOT EXISTS idx_games_total_reviews ON games(total_reviews)",
    r#"
    CREATE TABLE IF NOT EXISTS games_normalized (
        app_id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT,
        is_free BOOLEAN NOT NULL DEFAULT FALSE,
        price_final BIGINT,
        is_indie BOOLEAN NOT NULL DEFAULT TRUE,
        positive_reviews INTEGER NOT NULL DEFAULT 0,
        negative_reviews INTEGER NOT NULL DEFAULT 0,
        total_reviews INTEGER NOT NULL DEFAULT 0,
        source_updated_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS genres (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS developers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS publishers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_genres (
        app_id BIGINT NOT NULL REFERENCES games_normalized(app_id),
        genre_id BIGINT NOT NULL REFERENCES genres(id),
        PRIMARY KEY (app_id, genre_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_developers (
        app_id BIGINT NOT NULL REFERENCES games_normalized(app_id),
        developer_id BIGINT NOT NULL REFERENCES developers(id),
        PRIMARY KEY (app_id, developer_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_publishers (
        app_id BIGINT NOT NULL REFERENCES games_normalized(app_id),
        publisher_id BIGINT NOT NULL REFERENCES publishers(id),
        PRIMARY KEY (app_id, publisher_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_categories (
        app_id BIGINT NOT NULL REFERENCES games_normalized(app_id),
        category_id BIGINT NOT NULL REFERENCES categories(id),
        PRIMARY KEY (app_id, category_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_games_normalized_total_reviews ON games_normalized(total_reviews)",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::Descriptor;

    #[test]
    fn raw_game_merges_details_and_reviews() {
        let details = AppDetails {
            steam_appid: Some(42),
            name: Some("Sample Game".into()),
            kind: Some("game".into()),
            is_free: false,
            developers: vec!["Foo Studio".into()],
            publishers: vec!["Foo Studio".into()],
            genres: vec![Descriptor {
                description: Some("Indie".into()),
            }],
            categories: vec![Descriptor { description: None }],
            price_overview: Some(crate::steam::PriceOverview {
                currency: Some("USD".into()),
                initial: Some(1999),
                final_price: Some(999),
                discount_percent: Some(50),
            }),
            release_date: None,
            platforms: None,
        };
        let reviews = ReviewSummary {
            total_positive: 80,
            total_negative: 20,
            total_reviews: 100,
            review_score: 8,
            review_score_desc: Some("Very Positive".into()),
        };

        let game = RawGame::from_details(42, &details, &reviews);
        assert_eq!(game.app_id, 42);
        assert_eq!(game.price_final, Some(999));
        assert_eq!(game.genres, vec!["Indie"]);
        // Descriptor without a description is dropped, not stored empty.
        assert!(game.categories.is_empty());
        assert_eq!(game.total_reviews, 100);
        assert!(!game.release_date_coming_soon);
        assert!(!game.platforms_windows);
    }

    #[test]
    fn review_default_keeps_counts_at_zero() {
        let details = AppDetails {
            steam_appid: Some(7),
            name: Some("Quiet Game".into()),
            kind: Some("game".into()),
            ..Default::default()
        };
        let game = RawGame::from_details(7, &details, &ReviewSummary::default());
        assert_eq!(game.positive_reviews, 0);
        assert_eq!(game.total_reviews, 0);
        assert!(game.review_score_desc.is_none());
    }
}
