//! Indie game data pipeline: collects storefront metadata for
//! independent titles, stores the raw documents in Postgres, and
//! migrates them into a normalized schema for analysis.

pub mod analytics;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod db;
pub mod insight;
pub mod migrator;
pub mod steam;
pub mod tracing;

pub use classifier::{classify, ClassifierRules};
pub use collector::{run_pipeline, CollectionReport, Collector};
pub use config::AppConfig;
pub use db::Db;
pub use migrator::{MigrationReport, Migrator};
pub use steam::SteamClient;
