//! Query selectors
//!
//! How a caller names the versions and queries it wants: a wildcard, a
//! release number or title, and a loose prefix of a query title.

use std::convert::Infallible;
use std::str::FromStr;

use crate::domain::{TrackedQuery, TrackedVersion};
use crate::tracking::TrackingConfig;

/// Tokens that select everything.
const WILDCARDS: [&str; 2] = ["*", "all"];

fn is_wildcard(raw: &str) -> bool {
    WILDCARDS.iter().any(|w| raw.eq_ignore_ascii_case(w))
}

/// Lowercase with every space removed, so "Known Issues" matches "knowni".
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// =============================================================================
// Version Selector
// =============================================================================

/// Which tracked versions a lookup covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionSelector {
    /// Every tracked version
    #[default]
    All,
    /// A release number
    Number(i64),
    /// A version title or label, compared case-insensitively
    Title(String),
}

impl VersionSelector {
    /// Parse an optional selector; absent means all versions.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::All;
        };

        if is_wildcard(raw) {
            Self::All
        } else if let Ok(number) = raw.parse::<i64>() {
            Self::Number(number)
        } else {
            Self::Title(raw.to_string())
        }
    }

    /// Tracked versions this selector names. Unknown names resolve to none.
    pub fn resolve<'a>(&self, config: &'a TrackingConfig) -> Vec<&'a TrackedVersion> {
        match self {
            Self::All => config.versions().collect(),
            Self::Number(number) => config.version(*number).into_iter().collect(),
            Self::Title(title) => config
                .version_titles()
                .iter()
                .filter(|(_, t)| t.eq_ignore_ascii_case(title))
                .filter_map(|(number, _)| config.version(*number))
                .chain(config.versions().filter(|v| {
                    v.label.eq_ignore_ascii_case(title) && !v.title.eq_ignore_ascii_case(title)
                }))
                .collect(),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

// =============================================================================
// Query Selector
// =============================================================================

/// Which tracked queries a lookup covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuerySelector {
    /// Every tracked query
    #[default]
    All,
    /// Normalized title prefix
    Prefix(String),
}

impl QuerySelector {
    /// Parse an optional selector; absent means all queries.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|r| !r.is_empty()) {
            None => Self::All,
            Some(raw) if is_wildcard(raw) => Self::All,
            Some(raw) => Self::Prefix(normalize(raw)),
        }
    }

    pub fn matches(&self, query: &TrackedQuery) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => normalize(&query.title).starts_with(prefix.as_str()),
        }
    }

    /// Tracked queries this selector names, in configuration order.
    pub fn resolve<'a>(&self, config: &'a TrackingConfig) -> Vec<&'a TrackedQuery> {
        config.queries().iter().filter(|q| self.matches(q)).collect()
    }
}

impl FromStr for QuerySelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrackingConfig {
        TrackingConfig::new(
            vec![
                TrackedVersion {
                    number: 52,
                    title: "Release".into(),
                    label: "release".into(),
                },
                TrackedVersion {
                    number: 53,
                    title: "Beta".into(),
                    label: "beta".into(),
                },
                TrackedVersion {
                    number: 55,
                    title: "Nightly".into(),
                    label: "central".into(),
                },
            ],
            vec![
                TrackedQuery {
                    id: "known".into(),
                    title: "Known Issues".into(),
                    url_template: "a".into(),
                },
                TrackedQuery {
                    id: "new".into(),
                    title: "New".into(),
                    url_template: "b".into(),
                },
            ],
            "https://x/",
        )
    }

    fn numbers(versions: Vec<&TrackedVersion>) -> Vec<i64> {
        versions.iter().map(|v| v.number).collect()
    }

    #[test]
    fn test_version_selector_parse() {
        assert_eq!(VersionSelector::parse(None), VersionSelector::All);
        assert_eq!(VersionSelector::parse(Some("  ")), VersionSelector::All);
        assert_eq!(VersionSelector::parse(Some("*")), VersionSelector::All);
        assert_eq!(VersionSelector::parse(Some("ALL")), VersionSelector::All);
        assert_eq!(VersionSelector::parse(Some("53")), VersionSelector::Number(53));
        assert_eq!(
            "beta".parse::<VersionSelector>().unwrap(),
            VersionSelector::Title("beta".into())
        );
    }

    #[test]
    fn test_version_resolution() {
        let config = config();

        assert_eq!(numbers(VersionSelector::All.resolve(&config)), vec![52, 53, 55]);
        assert_eq!(numbers(VersionSelector::Number(53).resolve(&config)), vec![53]);
        assert!(VersionSelector::Number(99).resolve(&config).is_empty());
        assert_eq!(
            numbers(VersionSelector::Title("BETA".into()).resolve(&config)),
            vec![53]
        );
        assert_eq!(
            numbers(VersionSelector::Title("central".into()).resolve(&config)),
            vec![55]
        );
        assert!(VersionSelector::Title("aurora".into())
            .resolve(&config)
            .is_empty());
    }

    #[test]
    fn test_query_prefix_strips_spaces_and_case() {
        let config = config();

        let ids = |s: QuerySelector| -> Vec<String> {
            s.resolve(&config).iter().map(|q| q.id.clone()).collect()
        };

        assert_eq!(ids(QuerySelector::parse(Some("know"))), vec!["known"]);
        assert_eq!(ids(QuerySelector::parse(Some("Known I"))), vec!["known"]);
        assert_eq!(ids(QuerySelector::parse(Some("KNOWNISS"))), vec!["known"]);
        assert_eq!(ids(QuerySelector::parse(Some("n"))), vec!["new"]);
        assert_eq!(ids(QuerySelector::parse(None)), vec!["known", "new"]);
        assert!(ids(QuerySelector::parse(Some("blocking"))).is_empty());
    }
}
