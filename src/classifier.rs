//! Indie classification rule set.
//!
//! `classify` is a pure function over a validated details record: same
//! input, same answer, no I/O. A missing field is a negative signal, never
//! an error.

use std::collections::HashSet;

use crate::steam::{AppDetails, Descriptor};

/// Tunable inputs to the classification rule. Constructed once at startup
/// alongside the rest of the configuration.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    /// Case-insensitive substrings that mark non-game content.
    pub name_blocklist: Vec<String>,
    /// Case-insensitive substrings of large publishing companies.
    pub major_publishers: Vec<String>,
    /// Genre/category substrings that are an explicit indie signal.
    pub indie_markers: Vec<String>,
    /// A record with no developer attribution is still accepted when it
    /// carries at least this many genre tags. Heuristic, deliberately
    /// tunable.
    pub genre_signal_threshold: usize,
    /// Largest developer-set size still considered a small team.
    pub max_team_size: usize,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            name_blocklist: ["demo", "soundtrack", "trailer", "dlc"]
                .into_iter()
                .map(String::from)
                .collect(),
            major_publishers: [
                "valve",
                "electronic arts",
                "activision",
                "ubisoft",
                "bethesda",
                "square enix",
                "capcom",
                "bandai namco",
                "sega",
                "take-two",
                "nintendo",
                "sony",
                "microsoft",
                "rockstar",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            indie_markers: ["indie", "independent"]
                .into_iter()
                .map(String::from)
                .collect(),
            genre_signal_threshold: 3,
            max_team_size: 2,
        }
    }
}

fn descriptions(items: &[Descriptor]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|d| d.description.as_deref())
        .filter(|d| !d.trim().is_empty())
        .collect()
}

/// Decides whether a record qualifies as an independent production.
///
/// Stages, short-circuiting on the first decisive signal:
/// 1. basic validity (name/id present, type "game", blocklist, some
///    genre or developer signal),
/// 2. major-publisher exclusion,
/// 3. explicit indie genre/category marker,
/// 4. small-team heuristic (self-published, or at most
///    `max_team_size` developers; no developers at all needs
///    `genre_signal_threshold` genre tags).
pub fn classify(details: &AppDetails, rules: &ClassifierRules) -> bool {
    let Some(name) = details
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    else {
        return false;
    };
    if details.steam_appid.is_none() {
        return false;
    }
    if details.kind.as_deref() != Some("game") {
        return false;
    }
    let lower_name = name.to_lowercase();
    if rules
        .name_blocklist
        .iter()
        .any(|blocked| lower_name.contains(blocked))
    {
        return false;
    }
    let genres = descriptions(&details.genres);
    if genres.is_empty() && details.developers.is_empty() {
        return false;
    }

    if details.publishers.iter().any(|publisher| {
        let publisher = publisher.to_lowercase();
        rules
            .major_publishers
            .iter()
            .any(|major| publisher.contains(major))
    }) {
        return false;
    }

    let categories = descriptions(&details.categories);
    if genres.iter().chain(categories.iter()).any(|tag| {
        let tag = tag.to_lowercase();
        rules.indie_markers.iter().any(|marker| tag.contains(marker))
    }) {
        return true;
    }

    if details.developers.is_empty() {
        // Rich categorical signal without author attribution.
        return genres.len() >= rules.genre_signal_threshold;
    }
    if !details.publishers.is_empty() {
        let developers: HashSet<&str> =
            details.developers.iter().map(String::as_str).collect();
        let publishers: HashSet<&str> =
            details.publishers.iter().map(String::as_str).collect();
        if developers == publishers {
            return true;
        }
    }
    details.developers.len() <= rules.max_team_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(text: &str) -> Descriptor {
        Descriptor {
            description: Some(text.to_string()),
        }
    }

    fn base_game(name: &str) -> AppDetails {
        AppDetails {
            steam_appid: Some(12345),
            name: Some(name.to_string()),
            kind: Some("game".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_indie_genre_is_accepted() {
        let mut details = base_game("Sample Game");
        details.genres = vec![descriptor("Indie")];
        details.developers = vec!["X".into()];
        details.publishers = vec!["Y".into()];
        assert!(classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn indie_category_is_accepted() {
        let mut details = base_game("Sample Game");
        details.genres = vec![descriptor("Action")];
        details.categories = vec![descriptor("Indie")];
        details.developers = vec!["X".into()];
        assert!(classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn blocklisted_name_rejects_despite_indie_tag() {
        let mut details = base_game("Sample Soundtrack");
        details.genres = vec![descriptor("Indie")];
        details.developers = vec!["X".into()];
        assert!(!classify(&details, &ClassifierRules::default()));

        let mut dlc = base_game("Sample Game DLC");
        dlc.genres = vec![descriptor("Indie")];
        dlc.developers = vec!["X".into()];
        assert!(!classify(&dlc, &ClassifierRules::default()));
    }

    #[test]
    fn non_game_type_is_rejected() {
        let mut details = base_game("Sample Tool");
        details.kind = Some("software".to_string());
        details.genres = vec![descriptor("Indie")];
        details.developers = vec!["X".into()];
        assert!(!classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn missing_name_or_id_is_rejected() {
        let mut no_name = base_game("");
        no_name.developers = vec!["X".into()];
        assert!(!classify(&no_name, &ClassifierRules::default()));

        let mut no_id = base_game("Sample Game");
        no_id.steam_appid = None;
        no_id.developers = vec!["X".into()];
        assert!(!classify(&no_id, &ClassifierRules::default()));
    }

    #[test]
    fn major_publisher_rejects_regardless_of_other_signals() {
        let mut details = base_game("Big Budget Game");
        details.genres = vec![descriptor("Indie"), descriptor("Action")];
        details.developers = vec!["Some Studio".into()];
        details.publishers = vec!["Electronic Arts".into()];
        assert!(!classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn self_published_small_team_is_accepted_without_indie_tag() {
        let mut details = base_game("Quiet Farming Game");
        details.genres = vec![descriptor("Simulation")];
        details.developers = vec!["Foo Studio".into()];
        details.publishers = vec!["Foo Studio".into()];
        assert!(classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn large_team_with_distinct_publisher_is_rejected() {
        let mut details = base_game("Ensemble Production");
        details.genres = vec![descriptor("Action")];
        details.developers = vec!["A".into(), "B".into(), "C".into()];
        details.publishers = vec!["D".into()];
        assert!(!classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn no_signal_at_all_is_rejected() {
        let details = base_game("Mystery Entry");
        assert!(!classify(&details, &ClassifierRules::default()));
    }

    #[test]
    fn rich_genre_signal_covers_missing_developers() {
        let rules = ClassifierRules::default();
        let mut details = base_game("Well Tagged Game");
        details.genres = vec![
            descriptor("Action"),
            descriptor("Adventure"),
            descriptor("Puzzle"),
        ];
        assert!(classify(&details, &rules));

        details.genres.pop();
        assert!(!classify(&details, &rules));

        // The threshold is a tunable, not a law.
        let relaxed = ClassifierRules {
            genre_signal_threshold: 2,
            ..ClassifierRules::default()
        };
        assert!(classify(&details, &relaxed));
    }

    #[test]
    fn classify_is_deterministic() {
        let mut details = base_game("Sample Game");
        details.genres = vec![descriptor("Indie")];
        details.developers = vec!["X".into()];
        let rules = ClassifierRules::default();
        let first = classify(&details, &rules);
        for _ in 0..10 {
            assert_eq!(classify(&details, &rules), first);
        }
    }
}
