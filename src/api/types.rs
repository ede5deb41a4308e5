//! API request and view types.

use serde::{Deserialize, Serialize};

use crate::catalog::TaskKind;

/// Query string of `GET /event`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub token: Option<String>,
}

/// A task as shown on the event page.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView<'a> {
    /// Sequential ID (catalog index), submitted back as the `task` field
    pub id: usize,

    pub task: &'a str,

    #[serde(rename = "type")]
    pub kind: TaskKind,
}
