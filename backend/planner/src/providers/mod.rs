pub mod mock;
pub mod openai_compat;

use std::collections::HashMap;
use std::sync::Arc;

use atlas_core::LlmProvider;

/// Registry of LLM providers, looked up by name.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Registration order, used when no explicit order is configured.
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a provider by name. Re-registering replaces the old entry
    /// but keeps its position.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_none() {
            self.order.push(name);
        }
    }

    /// Get providers matching the given names (in order), paired with
    /// their registry names. Unknown names are silently skipped.
    pub fn get_providers(&self, names: &[String]) -> Vec<(String, Arc<dyn LlmProvider>)> {
        names
            .iter()
            .filter_map(|name| {
                self.providers
                    .get(name)
                    .map(|provider| (name.clone(), Arc::clone(provider)))
            })
            .collect()
    }

    /// All registered names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
