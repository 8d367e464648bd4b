//! Best-effort audit trail writer.

use std::sync::Arc;

use replica_core::{HistoryAction, HistoryLog, NewHistoryEntry};
use tracing::warn;
use uuid::Uuid;

/// Appends history entries without ever failing the caller.
#[derive(Clone)]
pub struct HistoryRecorder {
    log: Arc<dyn HistoryLog>,
}

impl HistoryRecorder {
    /// Wrap a history log.
    #[must_use]
    pub fn new(log: Arc<dyn HistoryLog>) -> Self {
        Self { log }
    }

    /// Append an entry; a failed append is logged and dropped.
    pub async fn record(
        &self,
        operation_id: Uuid,
        action: HistoryAction,
        actor: Option<Uuid>,
        detail: Option<String>,
    ) {
        let entry = NewHistoryEntry {
            operation_id,
            action,
            actor,
            detail,
        };
        if let Err(err) = self.log.append_history(&entry).await {
            warn!(
                error = %err,
                operation_id = %operation_id,
                action = %action,
                "failed to append copy history"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_test_support::mocks::MemoryCopyStore;

    #[tokio::test]
    async fn failed_appends_are_swallowed() {
        let store = MemoryCopyStore::new();
        let recorder = HistoryRecorder::new(Arc::new(store.clone()));
        let operation_id = Uuid::new_v4();

        store.set_history_unavailable(true).await;
        recorder
            .record(operation_id, HistoryAction::CopyInitiated, None, None)
            .await;
        store.set_history_unavailable(false).await;
        recorder
            .record(
                operation_id,
                HistoryAction::CopyCompleted,
                None,
                Some("4 entities".into()),
            )
            .await;

        let history = store.list_history(operation_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::CopyCompleted);
    }
}
