//! Tests for manifest persistence, settings, and malformed-file tolerance.

use serde_json::json;
use tempfile::tempdir;

use skein_contract::{
    CollectedItem, ContentStore, TaskKind, TaskRecord, TaskStatus, TaskStatusFilter,
};

use super::JsonStore;

fn task(task_id: &str, status: TaskStatus, created_unix_ms: u64) -> TaskRecord {
    let mut record = TaskRecord::new(
        task_id,
        TaskKind::VideoUpload,
        json!({}),
        "profile-a",
        created_unix_ms,
    );
    record.status = status;
    record
}

#[test]
fn functional_task_manifest_lifecycle() {
    let temp = tempdir().expect("tempdir");
    let store = JsonStore::open(temp.path()).expect("open store");

    let record = task("task-1", TaskStatus::Queued, 100);
    store.put_task(&record).expect("put");
    assert_eq!(store.get_task("task-1").expect("get"), Some(record.clone()));

    let mut updated = record;
    updated.status = TaskStatus::Completed;
    store.put_task(&updated).expect("update");
    assert_eq!(
        store.get_task("task-1").expect("get").map(|r| r.status),
        Some(TaskStatus::Completed)
    );

    assert!(store.delete_task("task-1").expect("delete"));
    assert!(!store.delete_task("task-1").expect("second delete"));
    assert_eq!(store.get_task("task-1").expect("get"), None);
}

#[test]
fn functional_list_tasks_filters_sorts_and_skips_malformed() {
    let temp = tempdir().expect("tempdir");
    let store = JsonStore::open(temp.path()).expect("open store");

    store.put_task(&task("task-old", TaskStatus::Completed, 100)).expect("put");
    store.put_task(&task("task-new", TaskStatus::Queued, 200)).expect("put");
    std::fs::write(temp.path().join("tasks/broken.json"), "{not-json").expect("write malformed");

    let all = store.list_tasks(None).expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].task_id, "task-new");

    let terminal = store
        .list_tasks(Some(TaskStatusFilter::Terminal))
        .expect("list terminal");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].task_id, "task-old");
}

#[test]
fn functional_settings_round_trip_and_overwrite() {
    let temp = tempdir().expect("tempdir");
    let store = JsonStore::open(temp.path()).expect("open store");

    assert_eq!(store.get_setting("scheduler/video_upload").expect("get"), None);
    store
        .set_setting("scheduler/video_upload", "{\"enabled\":true}")
        .expect("set");
    store.set_setting("other", "value").expect("set other");
    store
        .set_setting("scheduler/video_upload", "{\"enabled\":false}")
        .expect("overwrite");
    assert_eq!(
        store.get_setting("scheduler/video_upload").expect("get").as_deref(),
        Some("{\"enabled\":false}")
    );
    assert_eq!(store.get_setting("other").expect("get").as_deref(), Some("value"));
}

#[test]
fn functional_collected_items_dedup_identity_survives_reopen() {
    let temp = tempdir().expect("tempdir");
    {
        let store = JsonStore::open(temp.path()).expect("open store");
        store
            .put_collected_item(&CollectedItem {
                item_id: "feed/item:1".to_string(),
                title: "clip".to_string(),
                channel_handle: "channel-a".to_string(),
                collected_unix_ms: 100,
                payload: json!({"views": 12_000}),
            })
            .expect("put");
    }

    let reopened = JsonStore::open(temp.path()).expect("reopen");
    assert!(reopened.collected_item_exists("feed/item:1").expect("exists"));
    assert!(!reopened.collected_item_exists("feed/item:2").expect("exists"));
    let items = reopened.list_collected_items().expect("list");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "feed/item:1");
}
