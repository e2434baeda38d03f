//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the engine core and external
//! adapters: the secret store and the command execution backend.

use crate::job::JobDefinition;
use crate::run::{FailureCause, OutputLine};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Store of named credential contexts. Read-only during a run; the
/// external collaborator owns persistence and rotation.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Look up a context by name. `None` means the context is not
    /// registered.
    async fn lookup(&self, context: &str) -> Result<Option<HashMap<String, String>>>;
}

/// Request to execute one job with its resolved credential scope.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job: JobDefinition,
    /// The only credential material visible to the command.
    pub env: HashMap<String, String>,
}

/// Outcome of one job execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub output: Vec<OutputLine>,
    pub truncated: bool,
    pub duration_ms: u64,
    /// `None` means the command exited zero.
    pub cause: Option<FailureCause>,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.cause.is_none()
    }
}

/// Executes a job's external command. The engine treats the command as
/// opaque; only exit status and captured output come back.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome>;
}
