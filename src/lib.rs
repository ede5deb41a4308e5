//! # BingoBongo
//!
//! Submission server for a scavenger-hunt style event.
//!
//! Participants hold a token that identifies their group. They browse the
//! task list and submit a photo, a video or a text answer per task; every
//! submission is stored under the group's directory:
//!
//! ```text
//! storage/
//! └── {group}/
//!     └── {task_id}_{RFC3339 timestamp}.{kind}
//! ```
//!
//! ## Request Flow
//! 1. Router dispatches the request to a handler
//! 2. Handler validates fields against the task catalog and group directory
//! 3. Payload is staged to disk, then published under the group directory
//! 4. Handler redirects back to the event page, or returns an error
//!
//! ## Modules
//! - `catalog`: Ordered task list, loaded once at startup
//! - `groups`: Token to group mapping
//! - `storage`: Staging and publishing of submission files
//! - `templates`: HTML templates
//! - `api`: HTTP routes and handlers

pub mod api;
pub mod catalog;
pub mod config;
pub mod groups;
pub mod storage;
pub mod templates;

pub use catalog::{Task, TaskCatalog, TaskKind};
pub use config::Config;
pub use groups::GroupDirectory;
pub use storage::SubmissionStore;
