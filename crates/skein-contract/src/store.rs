use anyhow::Result;

use crate::collect::CollectedItem;
use crate::task::{TaskRecord, TaskStatusFilter};

/// Contract implemented by the persistent store.
///
/// The store is the single source of truth: every component treats a
/// successful write here as the durability boundary, and an event emitted
/// before the corresponding write is optimistic, not authoritative.
pub trait ContentStore: Send + Sync {
    fn put_task(&self, record: &TaskRecord) -> Result<()>;
    fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;
    /// Lists manifests sorted newest-first, optionally filtered by status.
    fn list_tasks(&self, filter: Option<TaskStatusFilter>) -> Result<Vec<TaskRecord>>;
    fn delete_task(&self, task_id: &str) -> Result<bool>;

    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    fn put_collected_item(&self, item: &CollectedItem) -> Result<()>;
    fn collected_item_exists(&self, item_id: &str) -> Result<bool>;
    fn list_collected_items(&self) -> Result<Vec<CollectedItem>>;
}
