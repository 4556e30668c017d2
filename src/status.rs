//! Task/status registry.
//!
//! The pipeline registers a status entry per task so an external renderer
//! can poll processed bytes, speed, ETA and progress percent at any time
//! without blocking the core. Entries are deregistered when the batch ends.

use crate::progress::TransformProgress;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;

pub type TaskId = u64;

/// Live status for one task, backed by the shared progress state.
#[derive(Debug)]
pub struct TaskStatus {
    /// Display name of the task (usually the download name)
    pub name: String,
    /// Operation stage label: "audio_remove", "attachment", "merge", ...
    pub stage: &'static str,
    pub progress: Arc<TransformProgress>,
    /// Name of the file currently being processed within the batch
    current_file: Mutex<String>,
}

impl TaskStatus {
    pub fn new(name: String, stage: &'static str, progress: Arc<TransformProgress>) -> Arc<Self> {
        Arc::new(Self {
            name,
            stage,
            progress,
            current_file: Mutex::new(String::new()),
        })
    }

    pub fn set_current_file(&self, name: &str) {
        if let Ok(mut guard) = self.current_file.lock() {
            *guard = name.to_string();
        }
    }

    /// Point-in-time view for the status renderer.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            name: self.name.clone(),
            stage: self.stage,
            current_file: self.current_file.lock().map(|g| g.clone()).unwrap_or_default(),
            progress_percent: self.progress.percent(),
            processed_bytes: self.progress.processed_bytes(),
            speed_bytes_sec: self.progress.speed_bytes_sec(),
            eta_seconds: self.progress.eta_seconds(),
        }
    }
}

/// What the external status renderer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub name: String,
    pub stage: &'static str,
    pub current_file: String,
    pub progress_percent: u8,
    pub processed_bytes: u64,
    pub speed_bytes_sec: f64,
    pub eta_seconds: Option<u64>,
}

/// Registry of live task statuses, keyed by task identity.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    inner: DashMap<TaskId, Arc<TaskStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the status entry for a task.
    pub fn register(&self, task_id: TaskId, status: Arc<TaskStatus>) {
        self.inner.insert(task_id, status);
    }

    pub fn deregister(&self, task_id: TaskId) {
        self.inner.remove(&task_id);
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<TaskStatus>> {
        self.inner.get(&task_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshots of every live task, for the status message renderer.
    pub fn snapshot_all(&self) -> Vec<(TaskId, StatusSnapshot)> {
        self.inner
            .iter()
            .map(|entry| (*entry.key(), entry.value().snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
