use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::Adapter;

/// Immutable registry of every configured bidder integration, built once at
/// startup and shared read-only across all in-flight auctions.
pub struct AdapterCatalog {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterCatalog {
    pub fn new(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.code(), adapter))
                .collect(),
        }
    }

    pub fn by_code(&self, code: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(code).cloned()
    }

    pub fn is_valid_code(&self, code: &str) -> bool {
        self.adapters.contains_key(code)
    }
}
