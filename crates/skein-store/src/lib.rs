//! JSON-file-backed persistent store.
//!
//! One directory per store root: task manifests under `tasks/`, collected
//! feed items under `collected/`, and a single `settings.json` blob. Every
//! write goes through a temp-file + rename, so readers never observe
//! partial data; loads tolerate missing files and skip malformed manifests
//! instead of failing the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use skein_contract::{CollectedItem, ContentStore, TaskRecord, TaskStatusFilter};
use skein_core::write_text_atomic;

const TASKS_DIR: &str = "tasks";
const COLLECTED_DIR: &str = "collected";
const SETTINGS_FILE: &str = "settings.json";

#[cfg(test)]
mod tests;

/// File-backed implementation of the `ContentStore` contract.
#[derive(Debug)]
pub struct JsonStore {
    root: PathBuf,
    // Serializes read-modify-write cycles on the settings blob.
    settings_guard: Mutex<()>,
}

impl JsonStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TASKS_DIR))
            .with_context(|| format!("failed to create {}", root.join(TASKS_DIR).display()))?;
        std::fs::create_dir_all(root.join(COLLECTED_DIR))
            .with_context(|| format!("failed to create {}", root.join(COLLECTED_DIR).display()))?;
        Ok(Self {
            root,
            settings_guard: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join(TASKS_DIR)
            .join(format!("{}.json", sanitize_for_path(task_id)))
    }

    fn collected_path(&self, item_id: &str) -> PathBuf {
        self.root
            .join(COLLECTED_DIR)
            .join(format!("{}.json", sanitize_for_path(item_id)))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    fn load_settings(&self) -> Result<BTreeMap<String, String>> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

impl ContentStore for JsonStore {
    fn put_task(&self, record: &TaskRecord) -> Result<()> {
        let path = self.task_path(record.task_id.as_str());
        let mut payload =
            serde_json::to_string_pretty(record).context("failed to encode task manifest")?;
        payload.push('\n');
        write_text_atomic(path.as_path(), payload.as_str())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let record = serde_json::from_str::<TaskRecord>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    fn list_tasks(&self, filter: Option<TaskStatusFilter>) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for path in collect_json_paths(&self.root.join(TASKS_DIR))? {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<TaskRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping malformed task manifest");
                }
            }
        }
        if let Some(filter) = filter {
            records.retain(|record| filter.matches(record.status));
        }
        records.sort_by(|left, right| {
            right
                .created_unix_ms
                .cmp(&left.created_unix_ms)
                .then_with(|| left.task_id.cmp(&right.task_id))
        });
        Ok(records)
    }

    fn delete_task(&self, task_id: &str) -> Result<bool> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete {}", path.display()))?;
        Ok(true)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let _guard = lock_unpoisoned(&self.settings_guard);
        Ok(self.load_settings()?.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let _guard = lock_unpoisoned(&self.settings_guard);
        let mut settings = self.load_settings()?;
        settings.insert(key.to_string(), value.to_string());
        let mut payload =
            serde_json::to_string_pretty(&settings).context("failed to encode settings")?;
        payload.push('\n');
        let path = self.settings_path();
        write_text_atomic(path.as_path(), payload.as_str())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn put_collected_item(&self, item: &CollectedItem) -> Result<()> {
        let path = self.collected_path(item.item_id.as_str());
        let mut payload =
            serde_json::to_string_pretty(item).context("failed to encode collected item")?;
        payload.push('\n');
        write_text_atomic(path.as_path(), payload.as_str())
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn collected_item_exists(&self, item_id: &str) -> Result<bool> {
        Ok(self.collected_path(item_id).exists())
    }

    fn list_collected_items(&self) -> Result<Vec<CollectedItem>> {
        let mut items = Vec::new();
        for path in collect_json_paths(&self.root.join(COLLECTED_DIR))? {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<CollectedItem>(&raw) {
                Ok(item) => items.push(item),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping malformed collected item");
                }
            }
        }
        items.sort_by(|left, right| left.item_id.cmp(&right.item_id));
        Ok(items)
    }
}

fn collect_json_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_json = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn sanitize_for_path(raw: &str) -> String {
    let sanitized = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect::<String>();
    if sanitized.is_empty() {
        "record".to_string()
    } else {
        sanitized
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
