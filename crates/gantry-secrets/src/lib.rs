//! Credential context store and per-job scope resolution for Gantry.

pub mod resolver;
pub mod store;

pub use resolver::ScopeResolver;
pub use store::InMemoryContextStore;
