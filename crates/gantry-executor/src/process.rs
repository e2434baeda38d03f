//! Job execution as a host process.

use async_trait::async_trait;
use gantry_core::ports::{ExecutionOutcome, ExecutionRequest, JobExecutor};
use gantry_core::run::{FailureCause, OutputLine, OutputStream};
use gantry_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Configuration for process execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Applies to jobs that declare no timeout of their own.
    pub default_timeout_seconds: u64,
    /// Combined stdout/stderr line cap. Lines beyond the cap are dropped
    /// and a single truncation marker is appended.
    pub max_output_lines: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 3600,
            max_output_lines: 10_000,
        }
    }
}

/// Runs job commands as child processes with an isolated environment:
/// the resolved credential scope is the only credential material the
/// command sees.
pub struct ProcessExecutor {
    config: ExecutorConfig,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn spawn_line_reader<R>(
        reader: R,
        stream: OutputStream,
        tx: mpsc::Sender<OutputLine>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut line_num = 0u32;

            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                let output = OutputLine {
                    stream,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl JobExecutor for ProcessExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let job = &request.job;
        let start = std::time::Instant::now();

        info!(
            job = %job.name,
            program = %job.command.program,
            "Executing job command"
        );

        let mut command = Command::new(&job.command.program);
        command
            .args(&job.command.args)
            .env_clear()
            .envs(&request.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // PATH passthrough so the opaque program can be resolved; nothing
        // else from the ambient environment leaks in.
        if !request.env.contains_key("PATH") {
            if let Ok(path) = std::env::var("PATH") {
                command.env("PATH", path);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", job.command.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("Missing child stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("Missing child stderr".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let stdout_handle = Self::spawn_line_reader(stdout, OutputStream::Stdout, tx.clone());
        let stderr_handle = Self::spawn_line_reader(stderr, OutputStream::Stderr, tx);

        // Collect into a bounded buffer; keep draining beyond the cap so
        // the child never blocks on a full pipe.
        let max_lines = self.config.max_output_lines;
        let collector = tokio::spawn(async move {
            let mut output = Vec::new();
            let mut truncated = false;

            while let Some(line) = rx.recv().await {
                if output.len() < max_lines {
                    output.push(line);
                } else {
                    truncated = true;
                }
            }

            if truncated {
                output.push(OutputLine {
                    stream: OutputStream::Stdout,
                    content: "[output truncated]".to_string(),
                    line_number: 0,
                    timestamp: chrono::Utc::now(),
                });
            }

            (output, truncated)
        });

        let timeout_seconds = job
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_seconds);

        let wait_result = match timeout(Duration::from_secs(timeout_seconds), child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(job = %job.name, timeout_seconds, "Job timed out, killing process");
                let _ = child.kill().await;
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;
                let (output, truncated) = collector
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;

                return Ok(ExecutionOutcome {
                    exit_code: -1,
                    output,
                    truncated,
                    duration_ms: start.elapsed().as_millis() as u64,
                    cause: Some(FailureCause::Timeout {
                        seconds: timeout_seconds,
                    }),
                });
            }
        };

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;
        let (output, truncated) = collector
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let status = wait_result
            .map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(job = %job.name, exit_code, duration_ms, "Job command completed");

        let cause = if exit_code == 0 {
            None
        } else {
            Some(FailureCause::ExecutionFailure { exit_code })
        };

        Ok(ExecutionOutcome {
            exit_code,
            output,
            truncated,
            duration_ms,
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::job::{CommandSpec, JobDefinition};
    use std::collections::HashMap;

    fn request(job: JobDefinition) -> ExecutionRequest {
        ExecutionRequest {
            job,
            env: HashMap::new(),
        }
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let executor = ProcessExecutor::default();
        let job = JobDefinition::new("greet", sh("echo hello"));

        let outcome = executor.execute(request(job)).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output.len(), 1);
        assert_eq!(outcome.output[0].content, "hello");
        assert_eq!(outcome.output[0].stream, OutputStream::Stdout);
    }

    #[tokio::test]
    async fn test_execute_failure() {
        let executor = ProcessExecutor::default();
        let job = JobDefinition::new("fail", sh("exit 3"));

        let outcome = executor.execute(request(job)).await.unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(
            outcome.cause,
            Some(FailureCause::ExecutionFailure { exit_code: 3 })
        );
    }

    #[tokio::test]
    async fn test_execute_captures_stderr() {
        let executor = ProcessExecutor::default();
        let job = JobDefinition::new("noisy", sh("echo oops >&2"));

        let outcome = executor.execute(request(job)).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.output.len(), 1);
        assert_eq!(outcome.output[0].stream, OutputStream::Stderr);
        assert_eq!(outcome.output[0].content, "oops");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let executor = ProcessExecutor::default();
        let job = JobDefinition::new("slow", sh("sleep 30")).with_timeout_seconds(1);

        let outcome = executor.execute(request(job)).await.unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.cause, Some(FailureCause::Timeout { seconds: 1 }));
        assert!(outcome.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let executor = ProcessExecutor::new(ExecutorConfig {
            default_timeout_seconds: 60,
            max_output_lines: 5,
        });
        let job = JobDefinition::new("chatty", sh("seq 1 100"));

        let outcome = executor.execute(request(job)).await.unwrap();
        assert!(outcome.success());
        assert!(outcome.truncated);
        // Five kept lines plus the marker.
        assert_eq!(outcome.output.len(), 6);
        assert_eq!(outcome.output.last().unwrap().content, "[output truncated]");
    }

    #[tokio::test]
    async fn test_environment_isolation() {
        // A variable set in the test process must not leak into the job.
        unsafe { std::env::set_var("GANTRY_AMBIENT_SECRET", "leaky") };

        let executor = ProcessExecutor::default();
        let job = JobDefinition::new(
            "probe",
            sh("echo scoped=$SCOPED ambient=$GANTRY_AMBIENT_SECRET"),
        );
        let mut env = HashMap::new();
        env.insert("SCOPED".to_string(), "yes".to_string());

        let outcome = executor.execute(ExecutionRequest { job, env }).await.unwrap();
        assert_eq!(outcome.output[0].content, "scoped=yes ambient=");
    }
}
