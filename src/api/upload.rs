//! `POST /upload` - file and text submissions.
//!
//! Accepts `multipart/form-data` (fields `task`, `token` and one file part
//! named `file`) or `application/x-www-form-urlencoded` (fields `task`,
//! `token` and `text`). Validation fails fast in this order: content type,
//! boundary, body size, task ID, token, group lookup, task lookup, payload.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartError, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use chrono::Utc;

use super::error::ApiError;
use super::routes::AppState;
use crate::catalog::TaskKind;
use crate::storage::{StageError, StagedPayload};

const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

const TASK_FIELD: &str = "task";
const TOKEN_FIELD: &str = "token";
const FILE_FIELD: &str = "file";
const TEXT_FIELD: &str = "text";

/// Allowance on top of the upload limit for form fields and multipart framing.
pub const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Decoded submission body, before validation.
#[derive(Debug)]
struct SubmissionForm {
    values: FormValues,
    payload: Payload,
}

/// Plain form fields in the order they were sent.
#[derive(Debug, Default)]
struct FormValues(Vec<(String, String)>);

#[derive(Debug)]
enum Payload {
    /// Multipart body: the first `file` part, plus how many others were sent.
    File {
        staged: Option<StagedPayload>,
        extra: usize,
    },
    /// URL-encoded body: the answer is the `text` field.
    Text,
}

impl Payload {
    /// Remove any staged file without publishing it.
    async fn discard(self) {
        if let Payload::File {
            staged: Some(staged),
            ..
        } = self
        {
            staged.discard().await;
        }
    }
}

impl FormValues {
    /// First value sent for `name`.
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (media_type, params) = parse_media_type(content_type)
        .ok_or_else(|| ApiError::bad_request("no content-type specified"))?;

    let SubmissionForm { values, payload } = match media_type.as_str() {
        MULTIPART_FORM_DATA => {
            let has_boundary = params
                .iter()
                .any(|(k, v)| k == "boundary" && !v.is_empty());
            if !has_boundary {
                return Err(ApiError::bad_request("invalid boundary"));
            }
            read_multipart(&state, request).await?
        }
        FORM_URLENCODED => read_urlencoded(&state, request).await?,
        _ => return Err(ApiError::bad_request("invalid content type")),
    };

    let (task_id, token, group, kind) = match submission_target(&state, &values) {
        Ok(target) => target,
        Err(e) => {
            payload.discard().await;
            return Err(e);
        }
    };

    let staged = match payload {
        Payload::File { staged, extra } if extra > 0 => {
            if let Some(staged) = staged {
                staged.discard().await;
            }
            return Err(ApiError::bad_request("only one file may be uploaded"));
        }
        Payload::File { staged, .. } => {
            staged.ok_or_else(|| ApiError::bad_request("missing file"))?
        }
        Payload::Text => {
            let text = values
                .get(TEXT_FIELD)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ApiError::bad_request("text is missing"))?;
            if text.len() as u64 > state.config.max_upload_bytes {
                return Err(too_large(&state));
            }
            state
                .store
                .stage_text(text)
                .await
                .context("Failed to stage text submission")?
        }
    };

    let size = staged.len();
    let path = state
        .store
        .commit(staged, group, task_id, kind, Utc::now())
        .await
        .with_context(|| format!("Failed to store submission for task {} of {}", task_id, group))?;
    tracing::info!(
        "Stored {} submission for task {} from {} ({} bytes) at {}",
        kind,
        task_id,
        group,
        size,
        path.display()
    );

    let location = format!("/event?token={}", urlencoding::encode(token));
    Ok((StatusCode::NO_CONTENT, [(header::LOCATION, location)]).into_response())
}

/// Resolve task ID, token, group and expected kind from the form fields.
fn submission_target<'a>(
    state: &'a AppState,
    values: &'a FormValues,
) -> Result<(usize, &'a str, &'a str, TaskKind), ApiError> {
    let task = values
        .get(TASK_FIELD)
        .ok_or_else(|| ApiError::bad_request("task id missing"))?;
    let task_id: usize = task
        .parse()
        .map_err(|_| ApiError::bad_request("invalid task id"))?;

    let token = values
        .get(TOKEN_FIELD)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("token is missing"))?;

    // Unknown tokens are rejected before the task lookup.
    let group = state
        .groups
        .group_for_token(token)
        .ok_or_else(|| ApiError::bad_request("invalid token"))?;

    let kind = state
        .catalog
        .type_by_id(task_id)
        .map_err(|_| ApiError::not_found("task does not exist"))?;

    Ok((task_id, token, group, kind))
}

/// Stream a multipart body, staging the `file` part to disk as it arrives.
async fn read_multipart(state: &Arc<AppState>, request: Request) -> Result<SubmissionForm, ApiError> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|_| ApiError::bad_request("invalid boundary"))?;

    let mut staged_file: Option<StagedPayload> = None;
    let mut extra = 0;
    let mut values = Vec::new();

    // Inner block so a staged file is removed on every error path.
    let read = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(state, e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            // An empty filename is what browsers send when no file was chosen.
            let is_file = field.file_name().is_some_and(|n| !n.is_empty());

            if name == FILE_FIELD && is_file {
                if staged_file.is_some() {
                    extra += 1;
                    continue;
                }
                let staged = staged_file.insert(
                    state
                        .store
                        .stage(state.config.max_upload_bytes)
                        .await
                        .context("Failed to open staging file")?,
                );
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(state, e))?
                {
                    staged.write_chunk(&chunk).await.map_err(|e| match e {
                        StageError::TooLarge { .. } => too_large(state),
                        StageError::Io(e) => {
                            ApiError::Internal(anyhow::Error::new(e).context("Failed to write upload"))
                        }
                    })?;
                }
            } else if field.file_name().is_none() {
                let value = field.text().await.map_err(|e| multipart_error(state, e))?;
                values.push((name, value));
            }
        }
        Ok::<(), ApiError>(())
    }
    .await;

    if let Err(e) = read {
        if let Some(staged) = staged_file {
            staged.discard().await;
        }
        return Err(e);
    }

    Ok(SubmissionForm {
        values: FormValues(values),
        payload: Payload::File {
            staged: staged_file,
            extra,
        },
    })
}

async fn read_urlencoded(
    state: &Arc<AppState>,
    request: Request,
) -> Result<SubmissionForm, ApiError> {
    let Form(values) = Form::<Vec<(String, String)>>::from_request(request, state)
        .await
        .map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large(state)
            } else {
                ApiError::bad_request("invalid form body")
            }
        })?;
    Ok(SubmissionForm {
        values: FormValues(values),
        payload: Payload::Text,
    })
}

fn too_large(state: &AppState) -> ApiError {
    ApiError::PayloadTooLarge(format!(
        "maximum file size is {}",
        state.config.upload_limit_label()
    ))
}

fn multipart_error(state: &AppState, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(state)
    } else {
        ApiError::bad_request(format!("malformed multipart body: {}", err.body_text()))
    }
}

/// Split a `Content-Type` value into its lowercased essence and parameters.
///
/// Returns `None` when there is no `type/subtype`.
fn parse_media_type(raw: &str) -> Option<(String, Vec<(String, String)>)> {
    let mut parts = raw.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    match essence.split_once('/') {
        Some((ty, sub)) if !ty.is_empty() && !sub.is_empty() => {}
        _ => return None,
    }

    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_ascii_lowercase(),
                v.trim().trim_matches('"').to_string(),
            )
        })
        .collect();
    Some((essence, params))
}
