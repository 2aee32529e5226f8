use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use bgw_storage::KeyStore;

/// Ships with the binary; the override table in the store takes
/// precedence per id.
pub const DEFAULT_MODEL_TABLE: &[(&str, &str)] = &[
    ("claude-opus-4-5", "global.anthropic.claude-opus-4-5-20251101-v1:0"),
    (
        "claude-opus-4-5-20251101",
        "global.anthropic.claude-opus-4-5-20251101-v1:0",
    ),
    ("claude-opus-4-6", "global.anthropic.claude-opus-4-6-v1"),
    (
        "claude-sonnet-4-5",
        "global.anthropic.claude-sonnet-4-5-20250929-v1:0",
    ),
    (
        "claude-sonnet-4-5-20250929",
        "global.anthropic.claude-sonnet-4-5-20250929-v1:0",
    ),
    (
        "claude-haiku-4-5",
        "global.anthropic.claude-haiku-4-5-20251001-v1:0",
    ),
    (
        "claude-haiku-4-5-20251001",
        "global.anthropic.claude-haiku-4-5-20251001-v1:0",
    ),
    (
        "claude-3-5-haiku",
        "us.anthropic.claude-3-5-haiku-20241022-v1:0",
    ),
    (
        "claude-3-5-haiku-20241022",
        "us.anthropic.claude-3-5-haiku-20241022-v1:0",
    ),
];

const OVERRIDE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Maps client model ids to upstream ids: override table snapshot, then
/// the static default table, then passthrough. A request sees one
/// consistent snapshot; refreshes happen at most once per minute.
pub struct ModelResolver {
    store: Arc<dyn KeyStore>,
    overrides: ArcSwap<HashMap<String, String>>,
    refreshed_at: Mutex<Option<Instant>>,
}

impl ModelResolver {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            overrides: ArcSwap::from_pointee(HashMap::new()),
            refreshed_at: Mutex::new(None),
        }
    }

    pub async fn resolve(&self, model: &str) -> String {
        self.refresh_if_stale().await;
        if let Some(upstream) = self.overrides.load().get(model) {
            return upstream.clone();
        }
        for (openai_id, upstream_id) in DEFAULT_MODEL_TABLE {
            if *openai_id == model {
                return (*upstream_id).to_string();
            }
        }
        model.to_string()
    }

    /// Sorted union of default and override model ids, for `/v1/models`.
    pub async fn known_model_ids(&self) -> Vec<String> {
        self.refresh_if_stale().await;
        let overrides = self.overrides.load();
        let mut ids: Vec<String> = DEFAULT_MODEL_TABLE
            .iter()
            .map(|(openai_id, _)| (*openai_id).to_string())
            .chain(overrides.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    async fn refresh_if_stale(&self) {
        {
            let mut refreshed_at = self.refreshed_at.lock().await;
            match *refreshed_at {
                Some(at) if at.elapsed() < OVERRIDE_REFRESH_INTERVAL => return,
                _ => *refreshed_at = Some(Instant::now()),
            }
        }
        // A failed refresh keeps the previous snapshot.
        match self.store.list_model_mappings().await {
            Ok(mappings) => {
                let map: HashMap<String, String> = mappings
                    .into_iter()
                    .map(|mapping| (mapping.openai_model_id, mapping.upstream_model_id))
                    .collect();
                self.overrides.store(Arc::new(map));
            }
            Err(err) => {
                tracing::warn!(error = %err, "model mapping refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgw_storage::MemoryKeyStore;

    #[tokio::test]
    async fn resolution_order_is_override_default_passthrough() {
        let store = MemoryKeyStore::new();
        store.insert_mapping("claude-sonnet-4-5", "custom.sonnet.override");
        let resolver = ModelResolver::new(Arc::new(store));

        // Override beats the default table.
        assert_eq!(
            resolver.resolve("claude-sonnet-4-5").await,
            "custom.sonnet.override"
        );
        // Default table.
        assert_eq!(
            resolver.resolve("claude-sonnet-4-5-20250929").await,
            "global.anthropic.claude-sonnet-4-5-20250929-v1:0"
        );
        // Passthrough, stable on its own output.
        let passthrough = resolver.resolve("global.anthropic.custom-v1:0").await;
        assert_eq!(passthrough, "global.anthropic.custom-v1:0");
        assert_eq!(resolver.resolve(&passthrough).await, passthrough);
    }

    #[tokio::test]
    async fn known_ids_are_sorted_union() {
        let store = MemoryKeyStore::new();
        store.insert_mapping("acme-model", "upstream.acme");
        let resolver = ModelResolver::new(Arc::new(store));

        let ids = resolver.known_model_ids().await;
        assert!(ids.contains(&"acme-model".to_string()));
        assert!(ids.contains(&"claude-opus-4-6".to_string()));
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
