//! Trigger filter evaluation.
//!
//! Decides whether a job is eligible for an event. Evaluation is total
//! and side-effect-free: any job/event pair resolves to a bool.

use crate::version::ReleaseTagMatcher;
use gantry_core::event::{Event, RefKind};
use gantry_core::job::{BranchRule, JobDefinition, RefPattern};

/// Evaluates job trigger filters against run events.
pub struct TriggerEvaluator {
    release_tags: ReleaseTagMatcher,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self {
            release_tags: ReleaseTagMatcher::with_v_prefix(),
        }
    }

    /// Check whether a job may run for the given event.
    ///
    /// A job with no filter is eligible for every event. A filter may
    /// restrict branches and tags simultaneously; only the rule matching
    /// the event's ref kind applies.
    pub fn is_eligible(&self, job: &JobDefinition, event: &Event) -> bool {
        let filter = match &job.filter {
            Some(filter) => filter,
            None => return true,
        };

        match event.kind {
            RefKind::Branch => match &filter.branches {
                None => true,
                Some(BranchRule::Only(patterns)) => self.any_matches(patterns, &event.ref_name),
                Some(BranchRule::Ignore(patterns)) => !self.any_matches(patterns, &event.ref_name),
            },
            RefKind::Tag => match &filter.tags {
                // No tag allow-list: never trigger on tag events.
                None => false,
                Some(patterns) => self.any_matches(patterns, &event.ref_name),
            },
        }
    }

    fn any_matches(&self, patterns: &[RefPattern], ref_name: &str) -> bool {
        patterns.iter().any(|p| self.pattern_matches(p, ref_name))
    }

    fn pattern_matches(&self, pattern: &RefPattern, ref_name: &str) -> bool {
        match pattern {
            RefPattern::Exact(name) => name == ref_name,
            RefPattern::Glob(glob) => glob_match(glob, ref_name),
            RefPattern::SemverRelease => self.release_tags.matches(ref_name),
        }
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if text.starts_with(&prefix_slash) {
            return !text[prefix_slash.len()..].contains('/');
        }
        return false;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0]) && text.ends_with(parts[1]);
        }
    }
    pattern == text
}
