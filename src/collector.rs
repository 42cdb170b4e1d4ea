//! Collection run: pick candidates from the catalog listing, fetch and
//! classify each one, and persist accepted titles to raw storage.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassifierRules};
use crate::config::CollectorConfig;
use crate::db::{Db, RawGame};
use crate::migrator::Migrator;
use crate::steam::{AppEntry, DetailsOutcome, FetchError, SteamClient};

/// Tally of one collection run.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionReport {
    /// Candidates that passed classification and were persisted.
    pub accepted: usize,
    /// Candidates fetched but rejected (non-indie, delisted, invalid).
    pub skipped: usize,
    /// Candidates whose fetch failed after retries.
    pub failed: usize,
}

impl CollectionReport {
    pub fn processed(&self) -> usize {
        self.accepted + self.skipped + self.failed
    }
}

/// Picks up to `target_count` new candidates from the full listing.
///
/// Priority order: curated seeds, then titles whose name matches a
/// keyword, then a random fill from the remainder. Apps already in raw
/// storage are never selected.
pub fn select_candidates(
    apps: &[AppEntry],
    existing: &HashSet<i64>,
    cfg: &CollectorConfig,
    rng: &mut impl Rng,
) -> Vec<i64> {
    let mut picked: Vec<i64> = Vec::with_capacity(cfg.target_count);
    let mut seen: HashSet<i64> = HashSet::with_capacity(cfg.target_count);

    for id in &cfg.seed_ids {
        if picked.len() >= cfg.target_count {
            break;
        }
        if !existing.contains(id) && seen.insert(*id) {
            picked.push(*id);
        }
    }

    let mut rest: Vec<&AppEntry> = Vec::new();
    for app in apps {
        if existing.contains(&app.appid) || seen.contains(&app.appid) {
            continue;
        }
        if app.name.trim().is_empty() {
            continue;
        }
        let lower = app.name.to_lowercase();
        if cfg.keywords.iter().any(|kw| lower.contains(kw)) {
            if picked.len() < cfg.target_count && seen.insert(app.appid) {
                picked.push(app.appid);
            }
        } else {
            rest.push(app);
        }
    }

    if picked.len() < cfg.target_count {
        let fill = cfg.target_count - picked.len();
        for app in rest.choose_multiple(rng, fill) {
            if seen.insert(app.appid) {
                picked.push(app.appid);
            }
        }
    }

    picked.truncate(cfg.target_count);
    picked
}

enum CandidateOutcome {
    Accepted(Box<RawGame>),
    Skipped(&'static str),
}

pub struct Collector<'a> {
    pub db: &'a Db,
    pub client: &'a SteamClient,
    pub cfg: &'a CollectorConfig,
    pub rules: &'a ClassifierRules,
}

impl<'a> Collector<'a> {
    /// Runs one collection pass. Individual candidate failures are
    /// counted and skipped; the run itself only fails when the catalog
    /// listing is unreachable, storage errors, or consecutive fetch
    /// failures hit the outage threshold.
    pub async fn run(&self) -> Result<CollectionReport> {
        let started = Instant::now();
        let deadline = self.cfg.max_runtime.map(|limit| started + limit);

        let apps = self
            .client
            .list_apps()
            .await
            .context("catalog listing unavailable")?;
        info!(listed = apps.len(), "fetched catalog listing");

        let existing = self.db.existing_app_ids().await?;
        let candidates =
            select_candidates(&apps, &existing, self.cfg, &mut rand::thread_rng());
        info!(
            candidates = candidates.len(),
            existing = existing.len(),
            target = self.cfg.target_count,
            "selected candidates"
        );

        let mut report = CollectionReport::default();
        let mut consecutive_failures = 0usize;

        for (wave, chunk) in candidates.chunks(self.cfg.batch_size.max(1)).enumerate() {
            if wave > 0 && !self.cfg.batch_pause.is_zero() {
                tokio::time::sleep(self.cfg.batch_pause).await;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        processed = report.processed(),
                        "soft deadline reached; stopping early"
                    );
                    break;
                }
            }

            let mut inflight = FuturesUnordered::new();
            for &app_id in chunk {
                inflight.push(self.process_candidate(app_id));
            }

            while let Some((app_id, outcome)) = inflight.next().await {
                match outcome {
                    Ok(CandidateOutcome::Accepted(game)) => {
                        self.db.upsert_game(&game).await?;
                        consecutive_failures = 0;
                        report.accepted += 1;
                        info!(app_id, name = %game.name, "stored indie title");
                    }
                    Ok(CandidateOutcome::Skipped(reason)) => {
                        consecutive_failures = 0;
                        report.skipped += 1;
                        debug!(app_id, reason, "skipped candidate");
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        report.failed += 1;
                        warn!(app_id, error = %err, consecutive_failures, "candidate fetch failed");
                        if consecutive_failures >= self.cfg.outage_threshold {
                            bail!(
                                "aborting run: {} consecutive fetch failures (upstream outage?)",
                                consecutive_failures
                            );
                        }
                    }
                }
            }
        }

        info!(
            accepted = report.accepted,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_secs = started.elapsed().as_secs(),
            "collection run finished"
        );
        Ok(report)
    }

    /// Fetches details (and, for accepted titles, review aggregates) for
    /// one candidate. Review failures degrade to zero counts.
    async fn process_candidate(
        &self,
        app_id: i64,
    ) -> (i64, Result<CandidateOutcome, FetchError>) {
        let result = async {
            let details = match self.client.app_details(app_id).await? {
                DetailsOutcome::Found(details) => details,
                DetailsOutcome::Unavailable(reason) => {
                    return Ok(CandidateOutcome::Skipped(reason));
                }
            };
            if !classify(&details, self.rules) {
                return Ok(CandidateOutcome::Skipped("not classified as indie"));
            }
            let reviews = match self.client.app_reviews(app_id).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(app_id, error = %err, "review fetch failed; storing zero counts");
                    Default::default()
                }
            };
            Ok(CandidateOutcome::Accepted(Box::new(RawGame::from_details(
                app_id, &details, &reviews,
            ))))
        }
        .await;
        (app_id, result)
    }
}

/// Full pipeline: collect, then migrate. The phases run strictly in
/// sequence; a migration failure surfaces as the run's failure even
/// though the collected raw rows are already durable.
pub async fn run_pipeline(
    db: &Db,
    client: &SteamClient,
    cfg: &CollectorConfig,
    rules: &ClassifierRules,
) -> Result<()> {
    let collector = Collector {
        db,
        client,
        cfg,
        rules,
    };
    let report = collector.run().await?;
    info!(
        accepted = report.accepted,
        skipped = report.skipped,
        failed = report.failed,
        "collection phase complete; starting migration"
    );

    let migration = Migrator { db }.run().await?;
    info!(
        records = migration.records_processed,
        lookups = migration.lookups_created,
        associations = migration.associations_created,
        "migration phase complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entry(appid: i64, name: &str) -> AppEntry {
        AppEntry {
            appid,
            name: name.to_string(),
        }
    }

    fn small_config() -> CollectorConfig {
        CollectorConfig {
            target_count: 4,
            seed_ids: vec![100, 200],
            keywords: vec!["indie".into(), "pixel".into()],
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn seeds_come_first() {
        let apps = vec![entry(1, "Indie Quest"), entry(2, "Racing Pro")];
        let cfg = small_config();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select_candidates(&apps, &HashSet::new(), &cfg, &mut rng);
        assert_eq!(&picked[..2], &[100, 200]);
        assert!(picked.contains(&1));
    }

    #[test]
    fn existing_ids_are_never_reselected() {
        let apps = vec![entry(1, "Indie Quest"), entry(2, "Pixel Farm")];
        let cfg = small_config();
        let existing: HashSet<i64> = [100, 1].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select_candidates(&apps, &existing, &cfg, &mut rng);
        assert!(!picked.contains(&100));
        assert!(!picked.contains(&1));
        assert!(picked.contains(&200));
        assert!(picked.contains(&2));
    }

    #[test]
    fn keyword_matches_beat_random_fill() {
        let mut apps: Vec<AppEntry> = (1000..1100)
            .map(|id| entry(id, &format!("Filler {id}")))
            .collect();
        apps.push(entry(5, "Pixel Dungeon"));
        let cfg = CollectorConfig {
            target_count: 3,
            seed_ids: vec![],
            keywords: vec!["pixel".into()],
            ..CollectorConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let picked = select_candidates(&apps, &HashSet::new(), &cfg, &mut rng);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0], 5);
    }

    #[test]
    fn target_count_bounds_the_selection() {
        let apps: Vec<AppEntry> = (1..50).map(|id| entry(id, "Indie Thing")).collect();
        let cfg = CollectorConfig {
            target_count: 10,
            seed_ids: vec![],
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let picked = select_candidates(&apps, &HashSet::new(), &cfg, &mut rng);
        assert_eq!(picked.len(), 10);
        let unique: HashSet<i64> = picked.iter().copied().collect();
        assert_eq!(unique.len(), picked.len());
    }

    #[test]
    fn nameless_entries_are_ignored() {
        let apps = vec![entry(1, "  "), entry(2, "Indie Quest")];
        let cfg = CollectorConfig {
            target_count: 5,
            seed_ids: vec![],
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let picked = select_candidates(&apps, &HashSet::new(), &cfg, &mut rng);
        assert_eq!(picked, vec![2]);
    }

    #[test]
    fn report_sums_processed() {
        let report = CollectionReport {
            accepted: 3,
            skipped: 2,
            failed: 1,
        };
        assert_eq!(report.processed(), 6);
    }
}
