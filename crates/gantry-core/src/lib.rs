//! Gantry Core
//!
//! Core domain types, traits, and error handling for the Gantry workflow
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod ports;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;
