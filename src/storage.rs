//! Submission storage on the local filesystem.
//!
//! Layout: `{root}/{group}/{task_id}_{RFC3339}.{kind}`.
//!
//! Payloads are written to `{root}/.staging/` first and only published under
//! their final name once fully written, so a failed upload never leaves a
//! truncated file in a group directory. Publishing uses a hard link, which
//! refuses to overwrite: if two submissions for the same task land in the same
//! second, the later one gets a `_1`, `_2`, ... suffix instead of replacing the
//! earlier one. On filesystems without hard links the staged file is copied
//! into a newly created (never pre-existing) destination instead.
//!
//! Staging files are removed with `tokio::fs` once committed or discarded.
//! `Drop` only covers payloads abandoned mid-request, e.g. when the client
//! disconnects and the handler future is cancelled.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::catalog::TaskKind;

const STAGING_DIR: &str = ".staging";

/// Upper bound on `_n` suffixes tried for a single name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Final file name for a submission.
///
/// `attempt` 0 gives the plain name; higher attempts add a collision suffix.
pub fn file_name(task_id: usize, kind: TaskKind, submitted_at: DateTime<Utc>, attempt: u32) -> String {
    let timestamp = submitted_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if attempt == 0 {
        format!("{}_{}.{}", task_id, timestamp, kind)
    } else {
        format!("{}_{}_{}.{}", task_id, timestamp, attempt, kind)
    }
}

/// Filesystem-backed store for submissions.
#[derive(Debug, Clone)]
pub struct SubmissionStore {
    root: PathBuf,
}

impl SubmissionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a new staging file that accepts at most `limit` bytes.
    pub async fn stage(&self, limit: u64) -> std::io::Result<StagedPayload> {
        let dir = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.part", uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&path).await?;
        Ok(StagedPayload {
            path,
            file: Some(file),
            written: 0,
            limit,
            removed: false,
        })
    }

    /// Stage a text answer in one go.
    pub async fn stage_text(&self, text: &str) -> Result<StagedPayload, StageError> {
        let mut staged = self.stage(text.len() as u64).await?;
        let written = async {
            staged.write_chunk(text.as_bytes()).await?;
            staged.finish().await?;
            Ok::<(), StageError>(())
        }
        .await;
        match written {
            Ok(()) => Ok(staged),
            Err(e) => {
                staged.discard().await;
                Err(e)
            }
        }
    }

    /// Publish a fully staged payload under the group's directory.
    ///
    /// Creates `{root}/{group}/` if needed and returns the final path. The
    /// staging file is removed whether or not publishing succeeds.
    pub async fn commit(
        &self,
        mut staged: StagedPayload,
        group: &str,
        task_id: usize,
        kind: TaskKind,
        submitted_at: DateTime<Utc>,
    ) -> std::io::Result<PathBuf> {
        let result = async {
            staged.finish().await?;
            let dir = self.root.join(group);
            tokio::fs::create_dir_all(&dir).await?;
            publish(&staged.path, &dir, task_id, kind, submitted_at).await
        }
        .await;
        staged.discard().await;
        result
    }
}

/// Place `src` in `dir` under the first free submission name.
async fn publish(
    src: &Path,
    dir: &Path,
    task_id: usize,
    kind: TaskKind,
    submitted_at: DateTime<Utc>,
) -> std::io::Result<PathBuf> {
    let mut use_copy = false;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let dest = dir.join(file_name(task_id, kind, submitted_at, attempt));
        let placed = if use_copy {
            copy_new(src, &dest).await
        } else {
            match tokio::fs::hard_link(src, &dest).await {
                Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(
                        "Hard link into {} failed ({}), copying instead",
                        dir.display(),
                        e
                    );
                    use_copy = true;
                    copy_new(src, &dest).await
                }
                other => other,
            }
        };
        match placed {
            Ok(()) => {
                if attempt > 0 {
                    tracing::debug!(
                        "Name collision for task {} in {}, stored as {}",
                        task_id,
                        dir.display(),
                        dest.display()
                    );
                }
                return Ok(dest);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "no free file name for task {} in {} after {} attempts",
            task_id,
            dir.display(),
            MAX_NAME_ATTEMPTS
        ),
    ))
}

/// Copy `src` to `dest`, failing with `AlreadyExists` if `dest` exists.
/// A partially written `dest` is removed.
async fn copy_new(src: &Path, dest: &Path) -> std::io::Result<()> {
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;
    let result = async {
        let mut input = tokio::fs::File::open(src).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.flush().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;
    if result.is_err() {
        drop(out);
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

/// A payload being written to (or fully written to) the staging area.
///
/// Release it with [`StagedPayload::discard`] or by committing it. Dropping
/// it removes the staging file as well, synchronously.
#[derive(Debug)]
pub struct StagedPayload {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    written: u64,
    limit: u64,
    removed: bool,
}

impl StagedPayload {
    /// Append a chunk, failing once the total would exceed the limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StageError> {
        let total = self.written + chunk.len() as u64;
        if total > self.limit {
            return Err(StageError::TooLarge { limit: self.limit });
        }
        let file = self.file.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "staged payload already finished")
        })?;
        file.write_all(chunk).await?;
        self.written = total;
        Ok(())
    }

    /// Flush and close the staging file. Idempotent.
    pub async fn finish(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close and delete the staging file.
    pub async fn discard(mut self) {
        drop(self.file.take());
        self.removed = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove staging file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for StagedPayload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove staging file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
