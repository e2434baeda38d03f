//! Per-job credential scope resolution.

use gantry_core::ports::ContextStore;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Resolves a job's declared contexts into one environment map, scoped to
/// a single execution and discarded on job completion.
pub struct ScopeResolver {
    store: Arc<dyn ContextStore>,
}

impl ScopeResolver {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    /// Merge the named contexts in declaration order. Later contexts
    /// override earlier ones on key collision. Fails with
    /// `UnknownContext` if any declared context is not registered; the
    /// caller fails that job without touching its siblings.
    pub async fn resolve(&self, contexts: &[String]) -> Result<HashMap<String, String>> {
        let mut scope = HashMap::new();

        for name in contexts {
            let secrets = self
                .store
                .lookup(name)
                .await?
                .ok_or_else(|| Error::UnknownContext(name.clone()))?;
            // Values never hit the logs, only names and counts.
            debug!(context = %name, keys = secrets.len(), "Context resolved");
            scope.extend(secrets);
        }

        Ok(scope)
    }
}
