//! Semver range matching over repository tags
//!
//! Ranges use space separated comparators with `||` alternatives, e.g. `>=1.2.0 <2.0.0`. A bare
//! version inside a range is an exact match. Tags are parsed tolerantly so that both `v1.2.3` and
//! `1.2.3` are candidates.

use semver::{Version, VersionReq};

const OPERATORS: [&str; 7] = [">=", "<=", ">", "<", "=", "~", "^"];

/// Parsed semver range
#[derive(Debug, Clone)]
pub struct TagRange {
    alternatives: Vec<VersionReq>,
}

impl TagRange {
    /// Parse `value` as a range; `None` means the value should be used as a literal tag
    pub fn parse(value: &str) -> Option<Self> {
        let alternatives = value
            .split("||")
            .map(parse_conjunction)
            .collect::<Option<Vec<_>>>()?;

        if alternatives.is_empty() {
            return None;
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Greatest tag satisfying the range
    pub fn select<'a, I>(&self, tags: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter()
            .filter_map(|tag| parse_tag_version(tag).map(|version| (version, tag.as_str())))
            .filter(|(version, _)| self.matches(version))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, tag)| tag)
    }
}

/// Parse a tag as a version, accepting an optional leading `v`
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);
    Version::parse(trimmed).ok()
}

fn parse_conjunction(value: &str) -> Option<VersionReq> {
    let mut comparators = Vec::new();
    let mut pending_operator: Option<&str> = None;

    for token in value.split_whitespace() {
        if OPERATORS.contains(&token) {
            if pending_operator.is_some() {
                return None;
            }
            pending_operator = Some(token);
            continue;
        }

        let comparator = match pending_operator.take() {
            Some(op) => format!("{}{}", op, token),
            None => normalize_comparator(token)?,
        };
        comparators.push(comparator);
    }

    if pending_operator.is_some() || comparators.is_empty() {
        return None;
    }

    VersionReq::parse(&comparators.join(", ")).ok()
}

fn normalize_comparator(token: &str) -> Option<String> {
    let first = token.chars().next()?;
    if first.is_ascii_digit() {
        // a bare version is an exact match, not a caret requirement
        Some(format!("={}", token))
    } else if OPERATORS.iter().any(|op| token.starts_with(op)) || token == "*" {
        Some(token.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_range_picks_greatest_match() {
        let range = TagRange::parse(">=1.2.0 <2.0.0").unwrap();
        let tags = tags(&["v1.1.0", "v1.2.0", "v1.3.1", "v2.0.0"]);
        assert_eq!(range.select(&tags), Some("v1.3.1"));
    }

    #[test]
    fn test_mixed_tag_prefixes() {
        let range = TagRange::parse(">=1.0.0").unwrap();
        let tags = tags(&["1.0.0", "v1.4.0", "release", "1.2.0"]);
        assert_eq!(range.select(&tags), Some("v1.4.0"));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let range = TagRange::parse("1.2.0").unwrap();
        let tags = tags(&["v1.2.0", "v1.3.0"]);
        assert_eq!(range.select(&tags), Some("v1.2.0"));
    }

    #[test]
    fn test_alternatives() {
        let range = TagRange::parse("<1.0.0 || >=3.0.0").unwrap();
        let tags = tags(&["0.9.0", "2.0.0", "3.1.0"]);
        assert_eq!(range.select(&tags), Some("3.1.0"));
    }

    #[test]
    fn test_literal_tags_are_not_ranges() {
        assert!(TagRange::parse("v1.0.0").is_none());
        assert!(TagRange::parse("release-2018").is_none());
        assert!(TagRange::parse("").is_none());
    }

    #[test]
    fn test_separated_operator() {
        let range = TagRange::parse(">= 1.2.0").unwrap();
        assert!(range.matches(&Version::new(1, 5, 0)));
        assert!(!range.matches(&Version::new(1, 1, 0)));
    }

    #[test]
    fn test_no_match() {
        let range = TagRange::parse(">=5.0.0").unwrap();
        assert_eq!(range.select(&tags(&["v1.0.0"])), None);
    }
}
