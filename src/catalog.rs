//! Task catalog: the ordered, read-only list of scavenger-hunt tasks.
//!
//! A task is identified by its position in the catalog file. The catalog is
//! loaded once at startup and shared immutably with every request handler.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read task catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Task {0} not found")]
    TaskNotFound(usize),
}

/// Expected content category of a task's submission.
///
/// Doubles as the file extension of stored submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Text,
    Image,
    Video,
    #[default]
    Unknown,
}

impl TaskKind {
    /// Classify a `type` value from the catalog file. Anything other than
    /// the three known kinds is `Unknown`.
    pub fn from_declared(declared: &str) -> Self {
        match declared {
            "text" => TaskKind::Text,
            "image" => TaskKind::Image,
            "video" => TaskKind::Video,
            _ => TaskKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Text => "text",
            TaskKind::Image => "image",
            TaskKind::Video => "video",
            TaskKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task prompt.
///
/// The `type` string is kept as written in the catalog so `GET /tasks`
/// returns it unchanged; [`Task::kind`] classifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Human-readable description shown to participants
    pub task: String,

    /// Declared submission type
    #[serde(rename = "type", default)]
    pub declared_type: String,
}

impl Task {
    pub fn new(task: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            task: task.into(),
            declared_type: kind.to_string(),
        }
    }

    /// Expected submission kind.
    pub fn kind(&self) -> TaskKind {
        TaskKind::from_declared(&self.declared_type)
    }
}

/// Ordered task list; the index of a task is its ID.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Load the catalog from a JSON array of `{"task": ..., "type": ...}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let tasks: Vec<Task> =
            serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!("Parsed {} tasks from {}", tasks.len(), path.display());
        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up the expected kind of the task with the given ID.
    pub fn type_by_id(&self, id: usize) -> Result<TaskKind, CatalogError> {
        self.tasks
            .get(id)
            .map(Task::kind)
            .ok_or(CatalogError::TaskNotFound(id))
    }

    /// Tasks paired with their IDs, in catalog order.
    pub fn enumerate(&self) -> impl Iterator<Item = (usize, &Task)> {
        self.tasks.iter().enumerate()
    }
}
