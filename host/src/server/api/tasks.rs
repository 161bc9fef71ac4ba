use axum::{
    extract::{Query, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{IntoParams, OpenApi};

use gitstat_lib::{TaskStatus, TaskStore};

use crate::{
    interfaces::{ApiResponse, HostError, HostResult},
    AppState,
};

const DEFAULT_TASK_LIMIT: u32 = 50;
const MAX_TASK_LIMIT: u32 = 200;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTasksQuery {
    /// Filter by task status.
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[utoipa::path(get, path = "/api/v1/tasks",
    tag = "Tasks",
    params(ListTasksQuery),
    responses(
        (status = 200, description = "Tasks, newest first"),
    )
)]
async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> HostResult<Json<ApiResponse<Value>>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<TaskStatus>()
                .map_err(HostError::Validation)?,
        ),
        None => None,
    };
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .map(|l| l.min(MAX_TASK_LIMIT))
        .unwrap_or(DEFAULT_TASK_LIMIT);

    let (tasks, total) = state.store.list_tasks(status, limit).await?;
    Ok(ApiResponse::ok(json!({
        "tasks": tasks,
        "total": total,
    })))
}

#[utoipa::path(delete, path = "/api/v1/tasks/clear",
    tag = "Tasks",
    responses(
        (status = 200, description = "Every task record removed"),
    )
)]
async fn clear_all(State(state): State<AppState>) -> HostResult<Json<ApiResponse<()>>> {
    state.store.delete_all_tasks().await?;
    Ok(ApiResponse::empty("all tasks cleared"))
}

#[utoipa::path(delete, path = "/api/v1/tasks/clear-completed",
    tag = "Tasks",
    responses(
        (status = 200, description = "Completed, failed and cancelled task records removed"),
    )
)]
async fn clear_completed(State(state): State<AppState>) -> HostResult<Json<ApiResponse<()>>> {
    state.store.delete_finished_tasks().await?;
    Ok(ApiResponse::empty("completed tasks cleared"))
}

#[derive(OpenApi)]
#[openapi(paths(list, clear_all, clear_completed))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/clear", delete(clear_all))
        .route("/clear-completed", delete(clear_completed))
}
