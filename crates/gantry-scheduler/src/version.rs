//! Semantic-version release tag matching.

use regex::Regex;

// SemVer 2.0.0: numeric core without leading zeros, dot-separated
// prerelease identifiers (numeric ones without leading zeros), and
// dot-separated alphanumeric/hyphen build identifiers.
const SEMVER: &str = r"(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?";

/// Validates release tags against the full semantic-version grammar.
/// The match is anchored: a prefix or suffix match is not a match.
/// Malformed input returns `false`, never errors.
#[derive(Debug, Clone)]
pub struct ReleaseTagMatcher {
    pattern: Regex,
}

impl ReleaseTagMatcher {
    /// Matches bare `MAJOR.MINOR.PATCH[-pre][+build]`.
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(&format!("^{}$", SEMVER)).unwrap(),
        }
    }

    /// Matches release tags with an optional leading `v`, the convention
    /// used by git release tags (`v1.2.3`).
    pub fn with_v_prefix() -> Self {
        Self {
            pattern: Regex::new(&format!("^v?{}$", SEMVER)).unwrap(),
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.pattern.is_match(tag)
    }
}

impl Default for ReleaseTagMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_versions() {
        let matcher = ReleaseTagMatcher::new();
        assert!(matcher.matches("0.0.0"));
        assert!(matcher.matches("1.2.3"));
        assert!(matcher.matches("10.20.30"));
        assert!(matcher.matches("1.0.0-alpha"));
        assert!(matcher.matches("1.0.0-alpha.1"));
        assert!(matcher.matches("1.0.0-0.3.7"));
        assert!(matcher.matches("1.0.0-x-y-z.--"));
        assert!(matcher.matches("1.0.0-alpha+001"));
        assert!(matcher.matches("1.0.0+20130313144700"));
        assert!(matcher.matches("1.0.0-beta+exp.sha.5114f85"));
        assert!(matcher.matches("1.0.0+21AF26D3----117B344092BD"));
    }

    #[test]
    fn test_malformed_versions() {
        let matcher = ReleaseTagMatcher::new();
        assert!(!matcher.matches(""));
        assert!(!matcher.matches("1"));
        assert!(!matcher.matches("1.2"));
        assert!(!matcher.matches("1.2.3.4"));
        assert!(!matcher.matches("v1.2.3"));
        assert!(!matcher.matches("01.2.3"));
        assert!(!matcher.matches("1.02.3"));
        assert!(!matcher.matches("1.2.03"));
        assert!(!matcher.matches("1.2.3-"));
        assert!(!matcher.matches("1.2.3+"));
        assert!(!matcher.matches("1.2.3-alpha..1"));
        // Leading zero in a numeric prerelease identifier.
        assert!(!matcher.matches("1.2.3-01"));
        assert!(!matcher.matches("1.2.3-alpha.01"));
        // Underscore is not a valid identifier character.
        assert!(!matcher.matches("1.2.3-alpha_1"));
    }

    #[test]
    fn test_anchored_match() {
        let matcher = ReleaseTagMatcher::new();
        assert!(!matcher.matches("release-1.2.3"));
        assert!(!matcher.matches("1.2.3-rc.1 "));
        assert!(!matcher.matches(" 1.2.3"));
        assert!(!matcher.matches("1.2.3\n"));
    }

    #[test]
    fn test_v_prefix_variant() {
        let matcher = ReleaseTagMatcher::with_v_prefix();
        assert!(matcher.matches("v1.2.3"));
        assert!(matcher.matches("1.2.3"));
        assert!(matcher.matches("v1.2.3-rc.1+build.5"));
        assert!(!matcher.matches("vv1.2.3"));
        assert!(!matcher.matches("v1.2"));
    }

    #[test]
    fn test_build_metadata_allows_leading_zeros() {
        let matcher = ReleaseTagMatcher::new();
        assert!(matcher.matches("1.2.3+01"));
        assert!(matcher.matches("1.2.3-rc.1+001.02"));
    }
}
