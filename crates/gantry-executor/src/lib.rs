//! Process-based job execution for Gantry.

pub mod process;

pub use process::{ExecutorConfig, ProcessExecutor};
