//! Last-command store shared by tools and the retry engine

use anyhow::Result;
use chatgen_storage::{CommandMetadata, Storage, StoredCommand};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Async front for the SQLite command table. Write and cleanup failures are logged and
/// swallowed so a broken database only disables retries.
#[derive(Clone)]
pub struct CommandStore {
    storage: Arc<Mutex<Storage>>,
}

impl CommandStore {
    pub fn new(storage: Arc<Mutex<Storage>>) -> Self {
        Self { storage }
    }

    pub async fn save(&self, chat_id: &str, message_id: &str, metadata: &CommandMetadata) {
        let storage = self.storage.lock().await;
        match storage.save_command(chat_id, message_id, metadata) {
            Ok(()) => debug!(
                chat_id = %chat_id,
                message_id = %message_id,
                tool = %metadata.tool,
                failed = metadata.failed,
                "Saved last command"
            ),
            Err(e) => warn!(
                chat_id = %chat_id,
                tool = %metadata.tool,
                error = %e,
                "Failed to save last command; retry unavailable for this chat"
            ),
        }
    }

    /// Errors are returned so callers can tell "nothing stored" from "store down".
    pub async fn get_last(&self, chat_id: &str) -> Result<Option<StoredCommand>> {
        let storage = self.storage.lock().await;
        storage.get_last_command(chat_id)
    }

    /// Delete commands older than `ttl`. Returns how many rows were removed.
    pub async fn cleanup(&self, ttl: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - ttl;
        let storage = self.storage.lock().await;
        match storage.delete_commands_older_than(cutoff) {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("Cleaned up {} stored command(s) older than {}", deleted, cutoff);
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Command cleanup failed");
                0
            }
        }
    }

    pub async fn clear_all(&self) -> usize {
        let storage = self.storage.lock().await;
        match storage.delete_all_commands() {
            Ok(deleted) => {
                info!("Cleared {} stored command(s)", deleted);
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear stored commands");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CommandStore;
    use crate::test_support::temp_store;
    use chatgen_storage::CommandMetadata;

    fn metadata(tool: &str) -> CommandMetadata {
        CommandMetadata {
            tool: tool.to_string(),
            tool_args: serde_json::json!({"prompt": "sunset"}),
            ..CommandMetadata::default()
        }
    }

    #[tokio::test]
    async fn save_then_get_last() {
        let store: CommandStore = temp_store("save");
        store.save("chat", "m1", &metadata("create_image")).await;
        store.save("chat", "m2", &metadata("create_video")).await;

        let last = store
            .get_last("chat")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(last.metadata.tool, "create_video");
    }

    #[tokio::test]
    async fn zero_ttl_cleanup_and_clear() {
        let store = temp_store("cleanup");
        store.save("a", "m1", &metadata("create_image")).await;
        store.save("b", "m2", &metadata("create_image")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(store.cleanup(chrono::Duration::zero()).await, 2);
        assert!(store.get_last("a").await.expect("query").is_none());

        store.save("a", "m3", &metadata("create_image")).await;
        assert_eq!(store.clear_all().await, 1);
    }
}
