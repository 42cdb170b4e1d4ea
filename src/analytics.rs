//! Read-side view over the normalized schema: price buckets, approval
//! ratings and representative dimension values per title.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use sqlx::Row;

use crate::db::Db;

/// Coarse price tier. Boundaries are in whole USD, lower-inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceBucket {
    Free,
    Budget,
    MidRange,
    Premium,
    Aaa,
}

impl PriceBucket {
    pub fn for_usd(price: f64) -> Self {
        if price <= 0.0 {
            PriceBucket::Free
        } else if price < 5.0 {
            PriceBucket::Budget
        } else if price < 15.0 {
            PriceBucket::MidRange
        } else if price < 30.0 {
            PriceBucket::Premium
        } else {
            PriceBucket::Aaa
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriceBucket::Free => "Free",
            PriceBucket::Budget => "Budget ($0-5)",
            PriceBucket::MidRange => "Mid-range ($5-15)",
            PriceBucket::Premium => "Premium ($15-30)",
            PriceBucket::Aaa => "AAA ($30+)",
        }
    }
}

impl fmt::Display for PriceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PriceBucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(PriceBucket::Free),
            "budget" => Ok(PriceBucket::Budget),
            "mid" | "midrange" | "mid-range" => Ok(PriceBucket::MidRange),
            "premium" => Ok(PriceBucket::Premium),
            "aaa" => Ok(PriceBucket::Aaa),
            other => anyhow::bail!("unknown price bucket '{}'", other),
        }
    }
}

/// Share of positive reviews, or None when a title has no reviews at
/// all (a zero rating would misrank unreviewed titles).
pub fn rating(positive: i32, total: i32) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    Some(f64::from(positive) / f64::from(total))
}

#[derive(Debug, Clone)]
pub struct AnalyticsRow {
    pub app_id: i64,
    pub name: String,
    pub price_usd: Option<f64>,
    pub bucket: Option<PriceBucket>,
    pub rating: Option<f64>,
    pub total_reviews: i32,
    pub primary_genre: Option<String>,
    pub primary_developer: Option<String>,
    pub primary_publisher: Option<String>,
    pub is_free: bool,
    pub is_indie: bool,
}

/// Optional row filters for the report view.
#[derive(Debug, Default, Clone)]
pub struct AnalyticsFilter {
    pub bucket: Option<PriceBucket>,
    pub genre: Option<String>,
    /// Some(true) keeps only free titles, Some(false) only paid.
    pub free: Option<bool>,
}

const ROW_LIMIT: i64 = 1000;

/// Fetches the analytical view, most-reviewed first. Representative
/// dimension values break ties lexicographically, so the output is
/// stable across runs.
///
/// Reads a bounded window (`ROW_LIMIT`, top 1000 by review count); the
/// filters apply within that window, so on a dataset larger than the
/// limit a filter can miss qualifying titles below the cutoff.
pub async fn fetch_rows(db: &Db, filter: &AnalyticsFilter) -> Result<Vec<AnalyticsRow>> {
    let rows = sqlx::query(
        r#"
        SELECT
            n.app_id,
            n.name,
            n.is_free,
            n.is_indie,
            n.price_final,
            n.positive_reviews,
            n.total_reviews,
            (SELECT MIN(g.name) FROM game_genres gg
                JOIN genres g ON g.id = gg.genre_id
                WHERE gg.app_id = n.app_id) AS primary_genre,
            (SELECT MIN(d.name) FROM game_developers gd
                JOIN developers d ON d.id = gd.developer_id
                WHERE gd.app_id = n.app_id) AS primary_developer,
            (SELECT MIN(p.name) FROM game_publishers gp
                JOIN publishers p ON p.id = gp.publisher_id
                WHERE gp.app_id = n.app_id) AS primary_publisher
        FROM games_normalized n
        ORDER BY n.total_reviews DESC, n.app_id
        LIMIT $1
        "#,
    )
    .persistent(false)
    .bind(ROW_LIMIT)
    .fetch_all(&db.pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let is_free: bool = row.get("is_free");
        let price_cents: Option<i64> = row.get("price_final");
        let price_usd = if is_free {
            Some(0.0)
        } else {
            price_cents.map(|cents| cents as f64 / 100.0)
        };
        let positive: i32 = row.get("positive_reviews");
        let total: i32 = row.get("total_reviews");
        out.push(AnalyticsRow {
            app_id: row.get("app_id"),
            name: row.get("name"),
            price_usd,
            bucket: price_usd.map(PriceBucket::for_usd),
            rating: rating(positive, total),
            total_reviews: total,
            primary_genre: row.get("primary_genre"),
            primary_developer: row.get("primary_developer"),
            primary_publisher: row.get("primary_publisher"),
            is_free,
            is_indie: row.get("is_indie"),
        });
    }

    Ok(out
        .into_iter()
        .filter(|row| matches_filter(row, filter))
        .collect())
}

fn matches_filter(row: &AnalyticsRow, filter: &AnalyticsFilter) -> bool {
    if let Some(bucket) = filter.bucket {
        if row.bucket != Some(bucket) {
            return false;
        }
    }
    if let Some(genre) = &filter.genre {
        let wanted = genre.to_lowercase();
        let matched = row
            .primary_genre
            .as_deref()
            .is_some_and(|g| g.to_lowercase().contains(&wanted));
        if !matched {
            return false;
        }
    }
    if let Some(free) = filter.free {
        if row.is_free != free {
            return false;
        }
    }
    true
}

/// Compact prose summary of a result set, suitable as input to the
/// narrative insight endpoint.
pub fn summary_text(rows: &[AnalyticsRow]) -> String {
    if rows.is_empty() {
        return "No titles matched the current filters.".to_string();
    }
    let total = rows.len();
    let free = rows.iter().filter(|r| r.is_free).count();
    let rated: Vec<f64> = rows.iter().filter_map(|r| r.rating).collect();
    let avg_rating = if rated.is_empty() {
        None
    } else {
        Some(rated.iter().sum::<f64>() / rated.len() as f64)
    };

    let mut text = format!("{total} indie titles ({free} free-to-play).");
    if let Some(avg) = avg_rating {
        text.push_str(&format!(" Average approval {:.0}%.", avg * 100.0));
    }
    if let Some(top) = rows.first() {
        text.push_str(&format!(
            " Most reviewed: {} ({} reviews).",
            top.name, top.total_reviews
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries_are_lower_inclusive() {
        assert_eq!(PriceBucket::for_usd(0.0), PriceBucket::Free);
        assert_eq!(PriceBucket::for_usd(4.99), PriceBucket::Budget);
        assert_eq!(PriceBucket::for_usd(5.0), PriceBucket::MidRange);
        assert_eq!(PriceBucket::for_usd(14.99), PriceBucket::MidRange);
        assert_eq!(PriceBucket::for_usd(15.0), PriceBucket::Premium);
        assert_eq!(PriceBucket::for_usd(29.99), PriceBucket::Premium);
        assert_eq!(PriceBucket::for_usd(30.0), PriceBucket::Aaa);
    }

    #[test]
    fn bucket_labels_match_report_vocabulary() {
        assert_eq!(PriceBucket::Free.label(), "Free");
        assert_eq!(PriceBucket::Budget.label(), "Budget ($0-5)");
        assert_eq!(PriceBucket::MidRange.label(), "Mid-range ($5-15)");
        assert_eq!(PriceBucket::Premium.label(), "Premium ($15-30)");
        assert_eq!(PriceBucket::Aaa.label(), "AAA ($30+)");
    }

    #[test]
    fn bucket_parses_cli_spellings() {
        assert_eq!("free".parse::<PriceBucket>().unwrap(), PriceBucket::Free);
        assert_eq!(
            "mid-range".parse::<PriceBucket>().unwrap(),
            PriceBucket::MidRange
        );
        assert_eq!("AAA".parse::<PriceBucket>().unwrap(), PriceBucket::Aaa);
        assert!("luxury".parse::<PriceBucket>().is_err());
    }

    #[test]
    fn unreviewed_titles_have_no_rating() {
        assert_eq!(rating(0, 0), None);
        assert_eq!(rating(5, -1), None);
        assert_eq!(rating(90, 100), Some(0.9));
    }

    fn sample_row(name: &str, total: i32) -> AnalyticsRow {
        AnalyticsRow {
            app_id: 1,
            name: name.to_string(),
            price_usd: Some(9.99),
            bucket: Some(PriceBucket::MidRange),
            rating: rating(80, total),
            total_reviews: total,
            primary_genre: Some("Indie".into()),
            primary_developer: None,
            primary_publisher: None,
            is_free: false,
            is_indie: true,
        }
    }

    #[test]
    fn filter_on_bucket_genre_and_free() {
        let row = sample_row("Sample", 100);
        let mut filter = AnalyticsFilter::default();
        assert!(matches_filter(&row, &filter));

        filter.bucket = Some(PriceBucket::Free);
        assert!(!matches_filter(&row, &filter));
        filter.bucket = Some(PriceBucket::MidRange);
        assert!(matches_filter(&row, &filter));

        filter.genre = Some("indie".into());
        assert!(matches_filter(&row, &filter));
        filter.genre = Some("racing".into());
        assert!(!matches_filter(&row, &filter));
        filter.genre = None;

        filter.free = Some(true);
        assert!(!matches_filter(&row, &filter));
    }

    #[test]
    fn summary_mentions_count_and_top_title() {
        let rows = vec![sample_row("Top Title", 500), sample_row("Other", 10)];
        let text = summary_text(&rows);
        assert!(text.contains("2 indie titles"));
        assert!(text.contains("Top Title"));
        assert!(text.contains("500 reviews"));

        assert_eq!(
            summary_text(&[]),
            "No titles matched the current filters."
        );
    }
}
