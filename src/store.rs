// Scheduler Store
// Durable home for tasks and execution history: two flat JSON documents
// under the store root, rewritten in full by every mutator.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::task::{ExecutionLog, SharedTask, Task, TaskStatus};

pub const TASKS_FILE: &str = "scheduler_tasks.json";
pub const LOGS_FILE: &str = "scheduler_logs.json";
pub const DEFAULT_LOG_CAP: usize = 1000;

/// Persistence layer for scheduler state. The store lock protects the task
/// map and log list; individual task records carry their own lock and are
/// only read transiently during serialization.
pub struct Store {
    root: PathBuf,
    log_cap: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    tasks: HashMap<String, SharedTask>,
    logs: Vec<ExecutionLog>,
}

impl Store {
    /// Open (or create) a store rooted at `root` with the default log cap.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_cap(root, DEFAULT_LOG_CAP)
    }

    /// Open with an explicit retention cap for execution logs.
    ///
    /// Unparseable documents are discarded in favor of the empty state: the
    /// scheduler is a best-effort companion subsystem and must not block
    /// process startup on a corrupt file.
    pub fn open_with_cap(root: impl AsRef<Path>, log_cap: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let tasks = load_tasks(&root.join(TASKS_FILE));
        let logs = load_logs(&root.join(LOGS_FILE));
        Ok(Self {
            root,
            log_cap,
            inner: RwLock::new(Inner { tasks, logs }),
        })
    }

    /// Insert or update a task keyed on its id, then persist both documents.
    /// Updates write through the existing shared record so engine-held
    /// handles observe the change.
    pub fn upsert_task(&self, task: Task) -> Result<()> {
        let shared = {
            let mut inner = self.inner.write();
            inner
                .tasks
                .entry(task.id.clone())
                .or_insert_with(|| task.clone().into_shared())
                .clone()
        };
        *shared.write() = task;
        self.save()
    }

    /// Remove a task. Its historical logs are kept; they carry the task name
    /// and stay meaningful on their own.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let removed = self.inner.write().tasks.remove(id).is_some();
        if !removed {
            return Err(SchedulerError::NotFound(format!("task {id}")));
        }
        self.save()
    }

    pub fn get_task(&self, id: &str) -> Option<SharedTask> {
        self.inner.read().tasks.get(id).cloned()
    }

    /// Snapshot of the task set. The returned list is stable; the records
    /// themselves are live shared handles.
    pub fn get_tasks(&self) -> Vec<SharedTask> {
        self.inner.read().tasks.values().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn active_task_count(&self) -> usize {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|shared| shared.read().status == TaskStatus::Active)
            .count()
    }

    /// Append one execution record, trimming the oldest entries once the
    /// retention cap is exceeded, then persist.
    pub fn append_log(&self, entry: ExecutionLog) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.logs.push(entry);
            if inner.logs.len() > self.log_cap {
                let excess = inner.logs.len() - self.log_cap;
                inner.logs.drain(..excess);
            }
        }
        self.save()
    }

    /// Copy of the execution history, newest first.
    pub fn get_logs(&self) -> Vec<ExecutionLog> {
        self.inner.read().logs.iter().rev().cloned().collect()
    }

    /// Serialize both documents to disk. Takes the store read lock for the
    /// snapshot; each task record is read transiently under its own lock.
    /// Mutators call this after releasing the write lock, so a concurrent
    /// field update never waits on serialization.
    pub fn save(&self) -> Result<()> {
        let (tasks_json, logs_json) = {
            let inner = self.inner.read();
            let documents: BTreeMap<String, Task> = inner
                .tasks
                .iter()
                .map(|(id, shared)| (id.clone(), shared.read().clone()))
                .collect();
            (
                serde_json::to_string_pretty(&documents)?,
                serde_json::to_string_pretty(&inner.logs)?,
            )
        };
        atomic_write(&self.root.join(TASKS_FILE), &tasks_json)?;
        atomic_write(&self.root.join(LOGS_FILE), &logs_json)?;
        Ok(())
    }
}

fn load_tasks(path: &Path) -> HashMap<String, SharedTask> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str::<HashMap<String, Task>>(&content) {
        Ok(documents) => documents
            .into_iter()
            .map(|(id, task)| (id, task.into_shared()))
            .collect(),
        Err(e) => {
            warn!("discarding unparseable {TASKS_FILE}: {e}");
            HashMap::new()
        }
    }
}

fn load_logs(path: &Path) -> Vec<ExecutionLog> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str(&content) {
        Ok(logs) => logs,
        Err(e) => {
            warn!("discarding unparseable {LOGS_FILE}: {e}");
            Vec::new()
        }
    }
}

/// Atomic write using temp file and rename.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn make_task(id: &str) -> Task {
        let mut task = Task::new(id.to_string(), format!("task {id}"), TaskKind::Interval);
        task.interval = "30m".to_string();
        task.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        task
    }

    fn make_log(task: &Task, n: u32) -> ExecutionLog {
        ExecutionLog::record(
            task,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, n, 0).unwrap(),
            100,
            true,
            &format!("output {n}"),
        )
    }

    #[test]
    fn open_creates_the_root_directory() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("nested").join("scheduler");
        let store = Store::open(&root).unwrap();
        assert!(root.exists());
        assert!(store.get_tasks().is_empty());
        assert!(store.get_logs().is_empty());
    }

    #[test]
    fn upsert_and_reload_roundtrips_tasks_and_logs() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();

        let mut task = make_task("t1");
        task.prompt = "summarize the news".to_string();
        task.model = "gpt-4o-mini".to_string();
        task.next_run_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap());
        store.upsert_task(task.clone()).unwrap();
        store.append_log(make_log(&task, 1)).unwrap();

        let reopened = Store::open(temp.path()).unwrap();
        let loaded = reopened.get_task("t1").unwrap();
        let loaded = loaded.read();
        assert_eq!(loaded.name, task.name);
        assert_eq!(loaded.prompt, task.prompt);
        assert_eq!(loaded.model, task.model);
        assert_eq!(loaded.next_run_at, task.next_run_at);
        assert_eq!(loaded.created_at, task.created_at);

        let logs = reopened.get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].output, "output 1");
        assert_eq!(logs[0].task_name, "task t1");
    }

    #[test]
    fn corrupt_documents_load_as_empty_state() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(TASKS_FILE), "{not json").unwrap();
        std::fs::write(temp.path().join(LOGS_FILE), "[42,").unwrap();

        let store = Store::open(temp.path()).unwrap();
        assert!(store.get_tasks().is_empty());
        assert!(store.get_logs().is_empty());
    }

    #[test]
    fn upsert_writes_through_existing_shared_handles() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.upsert_task(make_task("t1")).unwrap();

        // A handle taken before the update must observe the new fields.
        let held = store.get_task("t1").unwrap();
        let mut updated = make_task("t1");
        updated.name = "renamed".to_string();
        store.upsert_task(updated).unwrap();

        assert_eq!(held.read().name, "renamed");
    }

    #[test]
    fn delete_removes_the_task_but_keeps_its_logs() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();

        let task = make_task("t1");
        store.upsert_task(task.clone()).unwrap();
        store.append_log(make_log(&task, 1)).unwrap();
        store.delete_task("t1").unwrap();

        assert!(store.get_task("t1").is_none());
        assert_eq!(store.get_logs().len(), 1);

        let reopened = Store::open(temp.path()).unwrap();
        assert!(reopened.get_task("t1").is_none());
        assert_eq!(reopened.get_logs().len(), 1);
    }

    #[test]
    fn delete_of_missing_task_is_not_found() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();
        assert!(matches!(
            store.delete_task("ghost"),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[test]
    fn log_retention_keeps_the_most_recent_entries() {
        let temp = tempdir().unwrap();
        let store = Store::open_with_cap(temp.path(), 5).unwrap();
        let task = make_task("t1");

        for n in 1..=8 {
            store.append_log(make_log(&task, n)).unwrap();
        }

        let logs = store.get_logs();
        assert_eq!(logs.len(), 5);
        // Newest first: 8 down to 4.
        assert_eq!(logs[0].output, "output 8");
        assert_eq!(logs[4].output, "output 4");

        let reopened = Store::open_with_cap(temp.path(), 5).unwrap();
        assert_eq!(reopened.get_logs().len(), 5);
    }

    #[test]
    fn counts_reflect_status() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();

        store.upsert_task(make_task("t1")).unwrap();
        let mut paused = make_task("t2");
        paused.status = TaskStatus::Paused;
        store.upsert_task(paused).unwrap();

        assert_eq!(store.task_count(), 2);
        assert_eq!(store.active_task_count(), 1);
    }

    #[test]
    fn tasks_document_is_keyed_by_id() {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.upsert_task(make_task("b")).unwrap();
        store.upsert_task(make_task("a")).unwrap();

        let raw = std::fs::read_to_string(temp.path().join(TASKS_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc.get("a").is_some());
        assert!(doc.get("b").is_some());
        assert_eq!(doc["a"]["type"], "interval");
    }
}
