use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use indiescope::analytics::{self, AnalyticsFilter, PriceBucket};
use indiescope::collector::{run_pipeline, Collector};
use indiescope::config::AppConfig;
use indiescope::db::Db;
use indiescope::insight::InsightClient;
use indiescope::migrator::Migrator;
use indiescope::steam::SteamClient;
use indiescope::tracing::init_tracing;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "indiescope", version, about = "Indie game data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Collect new titles, then migrate raw rows to the normalized schema
    Run {
        /// Override the number of candidates to collect
        #[arg(long)]
        target: Option<usize>,
    },
    /// Collect new titles into raw storage only
    Collect {
        /// Override the number of candidates to collect
        #[arg(long)]
        target: Option<usize>,
    },
    /// Migrate raw rows to the normalized schema
    Migrate,
    /// Print the analytical report over the normalized schema
    Report {
        /// Restrict to one price bucket (free, budget, mid-range, premium, aaa)
        #[arg(long)]
        bucket: Option<PriceBucket>,
        /// Restrict to titles whose representative genre matches
        #[arg(long)]
        genre: Option<String>,
        /// Only free-to-play titles
        #[arg(long, default_value_t = false, conflicts_with = "paid")]
        free: bool,
        /// Only paid titles
        #[arg(long, default_value_t = false)]
        paid: bool,
        /// Append a narrative from the configured insight endpoint
        #[arg(long, default_value_t = false)]
        narrative: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    let db = Db::connect(&config.database_url, config.db_max_conns).await?;
    db.ensure_schema().await?;

    match cli.command {
        Commands::Run { target } => {
            if let Some(target) = target {
                config.collector.target_count = target;
            }
            let client = SteamClient::new(&config.fetch);
            run_pipeline(&db, &client, &config.collector, &config.rules).await?;
        }
        Commands::Collect { target } => {
            if let Some(target) = target {
                config.collector.target_count = target;
            }
            let client = SteamClient::new(&config.fetch);
            let collector = Collector {
                db: &db,
                client: &client,
                cfg: &config.collector,
                rules: &config.rules,
            };
            let report = collector.run().await?;
            let total = db.raw_count().await?;
            info!(
                accepted = report.accepted,
                skipped = report.skipped,
                failed = report.failed,
                raw_total = total,
                "collect finished"
            );
        }
        Commands::Migrate => {
            let report = Migrator { db: &db }.run().await?;
            info!(
                records = report.records_processed,
                lookups = report.lookups_created,
                associations = report.associations_created,
                "migrate finished"
            );
        }
        Commands::Report {
            bucket,
            genre,
            free,
            paid,
            narrative,
        } => {
            let filter = AnalyticsFilter {
                bucket,
                genre,
                free: match (free, paid) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let rows = analytics::fetch_rows(&db, &filter).await?;
            print_report(&rows);
            if let Some(refreshed) = db.last_refresh().await? {
                println!("Data as of {}", refreshed.format("%Y-%m-%d %H:%M UTC"));
            }

            if narrative {
                let insight =
                    InsightClient::new(config.insight_endpoint.clone(), config.insight_timeout);
                let text = insight.narrate(&analytics::summary_text(&rows)).await;
                if !text.is_empty() {
                    println!("\n{text}");
                }
            }
        }
    }

    Ok(())
}

fn print_report(rows: &[analytics::AnalyticsRow]) {
    println!(
        "{:<9} {:<40} {:<18} {:>8} {:>9} {:<20}",
        "APP", "NAME", "BUCKET", "RATING", "REVIEWS", "GENRE"
    );
    for row in rows {
        let bucket = row.bucket.map(|b| b.label()).unwrap_or("-");
        let rating = row
            .rating
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<9} {:<40} {:<18} {:>8} {:>9} {:<20}",
            row.app_id,
            truncate(&row.name, 40),
            bucket,
            rating,
            row.total_reviews,
            row.primary_genre.as_deref().unwrap_or("-"),
        );
    }
    println!("\n{}", analytics::summary_text(rows));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
