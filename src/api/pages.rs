//! Landing page, task list and per-group event page.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::header,
    response::{Html, IntoResponse},
};
use minijinja::context;

use super::error::ApiError;
use super::routes::AppState;
use super::types::{EventQuery, TaskView};
use crate::templates::{EVENT_TEMPLATE, INDEX_TEMPLATE};

/// `GET /`
pub async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let html = state
        .templates
        .render(INDEX_TEMPLATE, context! {})
        .context("Failed to render landing page")?;
    Ok(Html(html))
}

/// `GET /tasks` - the full catalog as `[{task, type}]`.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let body = serde_json::to_vec(state.catalog.tasks()).context("Failed to encode task list")?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// `GET /event?token=T` - tasks rendered for the token's group.
pub async fn event(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventQuery>,
) -> Result<Html<String>, ApiError> {
    let token = q
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("token is missing"))?;
    let group = state
        .groups
        .group_for_token(&token)
        .ok_or_else(|| ApiError::bad_request("invalid token"))?;

    let tasks: Vec<TaskView<'_>> = state
        .catalog
        .enumerate()
        .map(|(id, t)| TaskView {
            id,
            task: &t.task,
            kind: t.kind(),
        })
        .collect();

    let html = state
        .templates
        .render(EVENT_TEMPLATE, context! { token, group, tasks })
        .context("Failed to render event page")?;
    Ok(Html(html))
}
