//! Workflow and job definition types.
//!
//! These types describe the user-authored workflow: jobs with opaque
//! commands, dependency edges, credential contexts, and trigger filters.
//! A definition is immutable once a run starts; the run works against a
//! snapshot of it.

use serde::{Deserialize, Serialize};

/// Opaque external command. The engine never interprets what the command
/// does, only its exit code and captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A single pattern a git ref can be tested against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum RefPattern {
    /// Literal ref name.
    Exact(String),
    /// Glob: `*`, `prefix/*`, `prefix/**`, or a single infix `*`.
    Glob(String),
    /// Semantic-version release tag, optionally `v`-prefixed.
    SemverRelease,
}

/// Branch condition: either an allow-list or an ignore-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchRule {
    /// Run only on branches matching one of the patterns.
    Only(Vec<RefPattern>),
    /// Run on all branches except those matching one of the patterns.
    Ignore(Vec<RefPattern>),
}

impl BranchRule {
    /// Ignore-all rule, for jobs meant to run only on tag events.
    pub fn ignore_all() -> Self {
        BranchRule::Ignore(vec![RefPattern::Glob("*".to_string())])
    }
}

/// Trigger filter on a job. Branch and tag conditions are independent;
/// only the condition matching the event's ref kind applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub branches: Option<BranchRule>,
    /// Tag allow-list. Absent means the job never triggers on tag events.
    #[serde(default)]
    pub tags: Option<Vec<RefPattern>>,
}

impl FilterRule {
    /// Filter for release jobs: never on branch pushes, only on semver
    /// release tags.
    pub fn release_only() -> Self {
        Self {
            branches: Some(BranchRule::ignore_all()),
            tags: Some(vec![RefPattern::SemverRelease]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub command: CommandSpec,
    /// Named credential contexts, resolved at execution time. Later
    /// contexts override earlier ones on key collision.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Names of jobs that must succeed before this one runs.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Absent filter means the job is eligible for every event.
    #[serde(default)]
    pub filter: Option<FilterRule>,
    /// Per-job execution timeout. The executor default applies if unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            contexts: Vec::new(),
            requires: Vec::new(),
            filter: None,
            timeout_seconds: None,
        }
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: FilterRule) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub jobs: Vec<JobDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn job(mut self, job: JobDefinition) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
