use std::sync::Arc;

use bgw_storage::{KeyStore, UsageRow};

/// Writes one usage row per completed request from a deferred task.
/// Write failures are logged and swallowed; they never influence the
/// client response.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn KeyStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    pub fn record(&self, row: UsageRow) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.record_usage(&row).await {
                tracing::warn!(
                    request_id = %row.request_id,
                    error = %err,
                    "usage row write failed"
                );
            }
        });
    }
}
