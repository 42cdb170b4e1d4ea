//! Raw-to-normalized migration.
//!
//! Reads the denormalized `games` table and populates the star schema:
//! `games_normalized`, the four lookup tables, and the four association
//! tables. Every step is set-based SQL with ON CONFLICT handling, so the
//! whole migration is idempotent and safe to rerun after a partial
//! failure.

use std::fmt;

use sqlx::Row;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    ExtractMasterNames,
    UpsertLookups,
    UpsertNormalizedRecords,
    UpsertAssociations,
}

impl MigrationStep {
    pub const ALL: [MigrationStep; 4] = [
        MigrationStep::ExtractMasterNames,
        MigrationStep::UpsertLookups,
        MigrationStep::UpsertNormalizedRecords,
        MigrationStep::UpsertAssociations,
    ];
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStep::ExtractMasterNames => "extract master names",
            MigrationStep::UpsertLookups => "upsert lookup tables",
            MigrationStep::UpsertNormalizedRecords => "upsert normalized records",
            MigrationStep::UpsertAssociations => "upsert associations",
        };
        f.write_str(name)
    }
}

/// A migration failure, annotated with how far the run got. Completed
/// steps are committed; rerunning picks up where this left off.
#[derive(Debug, Error)]
#[error("migration failed at step '{step}' ({completed} steps committed): {source}")]
pub struct MigrationError {
    pub step: MigrationStep,
    pub completed: usize,
    #[source]
    pub source: sqlx::Error,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationReport {
    /// Rows inserted or refreshed in `games_normalized`.
    pub records_processed: u64,
    /// New rows across the four lookup tables.
    pub lookups_created: u64,
    /// New rows across the four association tables.
    pub associations_created: u64,
}

/// (raw array column, lookup table, association table, association fk)
const DIMENSIONS: [(&str, &str, &str, &str); 4] = [
    ("genres", "genres", "game_genres", "genre_id"),
    ("developers", "developers", "game_developers", "developer_id"),
    ("publishers", "publishers", "game_publishers", "publisher_id"),
    ("categories", "categories", "game_categories", "category_id"),
];

pub struct Migrator<'a> {
    pub db: &'a Db,
}

impl<'a> Migrator<'a> {
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();
        let mut completed = 0usize;

        for step in MigrationStep::ALL {
            let fail = move |source: sqlx::Error| MigrationError {
                step,
                completed,
                source,
            };
            match step {
                MigrationStep::ExtractMasterNames => {
                    let names = self.extract_master_names().await.map_err(fail)?;
                    info!(names, "extracted distinct dimension names");
                }
                MigrationStep::UpsertLookups => {
                    report.lookups_created = self.upsert_lookups().await.map_err(fail)?;
                    info!(created = report.lookups_created, "lookup tables upserted");
                }
                MigrationStep::UpsertNormalizedRecords => {
                    report.records_processed =
                        self.upsert_normalized_records().await.map_err(fail)?;
                    info!(
                        records = report.records_processed,
                        "normalized records upserted"
                    );
                }
                MigrationStep::UpsertAssociations => {
                    report.associations_created =
                        self.upsert_associations().await.map_err(fail)?;
                    info!(
                        created = report.associations_created,
                        "associations upserted"
                    );
                }
            }
            completed += 1;
        }

        self.verify().await;
        Ok(report)
    }

    /// Counts the distinct names per dimension. The materialized
    /// extraction is delegated to the lookup upsert's
    /// `SELECT DISTINCT UNNEST`; this step reads the same sets up front
    /// so a run fails before any write when the raw arrays are
    /// unreadable.
    async fn extract_master_names(&self) -> Result<u64, sqlx::Error> {
        let mut total = 0u64;
        for (column, _, _, _) in DIMENSIONS {
            let sql = format!(
                "SELECT COUNT(DISTINCT name) FROM (SELECT UNNEST({column}) AS name FROM games WHERE {column} <> '{{}}') AS t"
            );
            let count: i64 = sqlx::query_scalar(&sql)
                .persistent(false)
                .fetch_one(&self.db.pool)
                .await?;
            total += count.max(0) as u64;
        }
        Ok(total)
    }

    async fn upsert_lookups(&self) -> Result<u64, sqlx::Error> {
        let mut tx = self.db.pool.begin().await?;
        let mut created = 0u64;
        for (column, lookup, _, _) in DIMENSIONS {
            let sql = format!(
                "INSERT INTO {lookup} (name) \
                 SELECT DISTINCT UNNEST({column}) FROM games WHERE {column} <> '{{}}' \
                 ON CONFLICT (name) DO NOTHING"
            );
            let result = sqlx::query(&sql).persistent(false).execute(&mut *tx).await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Set-based upsert into `games_normalized`. The update arm only
    /// fires when the raw row has a newer `updated_at`, so unchanged
    /// records are not rewritten on every run.
    async fn upsert_normalized_records(&self) -> Result<u64, sqlx::Error> {
        let mut tx = self.db.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO games_normalized (
                app_id, name, type, is_free, price_final,
                positive_reviews, negative_reviews, total_reviews,
                source_updated_at
            )
            SELECT
                app_id, name, type, is_free, price_final,
                positive_reviews, negative_reviews, total_reviews,
                updated_at
            FROM games
            ON CONFLICT (app_id) DO UPDATE SET
                name = EXCLUDED.name,
                type = EXCLUDED.type,
                is_free = EXCLUDED.is_free,
                price_final = EXCLUDED.price_final,
                positive_reviews = EXCLUDED.positive_reviews,
                negative_reviews = EXCLUDED.negative_reviews,
                total_reviews = EXCLUDED.total_reviews,
                source_updated_at = EXCLUDED.source_updated_at,
                updated_at = now()
            WHERE games_normalized.source_updated_at IS DISTINCT FROM EXCLUDED.source_updated_at
            "#,
        )
        .persistent(false)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn upsert_associations(&self) -> Result<u64, sqlx::Error> {
        let mut tx = self.db.pool.begin().await?;
        let mut created = 0u64;
        for (column, lookup, association, fk) in DIMENSIONS {
            let sql = format!(
                "INSERT INTO {association} (app_id, {fk}) \
                 SELECT n.app_id, l.id \
                 FROM games g \
                 JOIN games_normalized n ON n.app_id = g.app_id \
                 CROSS JOIN LATERAL UNNEST(g.{column}) AS tag(name) \
                 JOIN {lookup} l ON l.name = tag.name \
                 ON CONFLICT DO NOTHING"
            );
            let result = sqlx::query(&sql).persistent(false).execute(&mut *tx).await?;
            created += result.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Best-effort row counts after a run. Logs only; a verification
    /// failure never fails the migration itself.
    async fn verify(&self) {
        for table in ["games", "games_normalized", "genres", "game_genres"] {
            let sql = format!("SELECT COUNT(*) AS n FROM {table}");
            match sqlx::query(&sql)
                .persistent(false)
                .fetch_one(&self.db.pool)
                .await
            {
                Ok(row) => {
                    let n: i64 = row.get("n");
                    info!(table, rows = n, "post-migration count");
                }
                Err(err) => {
                    tracing::warn!(table, error = %err, "post-migration count failed");
                }
            }
        }
    }
}
