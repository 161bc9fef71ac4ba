use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{IntoParams, OpenApi, ToSchema};

use gitstat_lib::{RepoStatus, Repository, Task};

use crate::{
    interfaces::{ApiResponse, HostError, HostResult},
    service::{AddReposRequest, AddReposResponse},
    AppState,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListReposQuery {
    /// Filter by lifecycle status.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SwitchBranchRequest {
    pub branch: String,
}

#[utoipa::path(post, path = "/api/v1/repos/batch",
    tag = "Repositories",
    request_body = AddReposRequest,
    responses(
        (status = 200, description = "Per-URL success and failure lists", body = AddReposResponse),
        (status = 400, description = "Empty or malformed request"),
    )
)]
async fn add_batch(
    State(state): State<AppState>,
    Json(request): Json<AddReposRequest>,
) -> HostResult<Json<ApiResponse<AddReposResponse>>> {
    if request.repos.is_empty() {
        return Err(HostError::Validation("repos cannot be empty".to_string()));
    }
    let response = state.repos.add_repos(request).await?;
    Ok(ApiResponse::ok(response))
}

#[utoipa::path(get, path = "/api/v1/repos",
    tag = "Repositories",
    params(ListReposQuery),
    responses(
        (status = 200, description = "A page of repositories"),
    )
)]
async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListReposQuery>,
) -> HostResult<Json<ApiResponse<Value>>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<RepoStatus>()
                .map_err(HostError::Validation)?,
        ),
        None => None,
    };
    let page = query.page.filter(|p| *p > 0).unwrap_or(1);
    let page_size = query
        .page_size
        .filter(|s| *s > 0 && *s <= MAX_PAGE_SIZE)
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let (repositories, total) = state.repos.list_repos(status, page, page_size).await?;
    Ok(ApiResponse::ok(json!({
        "total": total,
        "page": page,
        "page_size": page_size,
        "repositories": repositories,
    })))
}

#[utoipa::path(get, path = "/api/v1/repos/{id}",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Repository row", body = Repository),
        (status = 404, description = "Repository not found"),
    )
)]
async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Repository>>> {
    let repo = state.repos.get_repo(id).await?;
    Ok(ApiResponse::ok(repo))
}

#[utoipa::path(get, path = "/api/v1/repos/{id}/branches",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Live branch listing; requires the repo to be ready"),
        (status = 404, description = "Repository not found"),
    )
)]
async fn get_branches(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Value>>> {
    let branches = state.repos.get_branches(id).await?;
    Ok(ApiResponse::ok(json!({
        "count": branches.len(),
        "branches": branches,
    })))
}

#[utoipa::path(post, path = "/api/v1/repos/{id}/switch-branch",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    request_body = SwitchBranchRequest,
    responses(
        (status = 200, description = "Switch task submitted", body = Task),
    )
)]
async fn switch_branch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SwitchBranchRequest>,
) -> HostResult<Json<ApiResponse<Task>>> {
    if request.branch.is_empty() {
        return Err(HostError::Validation("branch cannot be empty".to_string()));
    }
    let task = state.repos.switch_branch(id, &request.branch).await?;
    Ok(ApiResponse::with_message("branch switch task submitted", task))
}

#[utoipa::path(post, path = "/api/v1/repos/{id}/update",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Pull task submitted", body = Task),
    )
)]
async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Task>>> {
    let task = state.repos.update_repo(id).await?;
    Ok(ApiResponse::with_message("update task submitted", task))
}

#[utoipa::path(post, path = "/api/v1/repos/{id}/reset",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Reset task submitted; accepted in any repository state", body = Task),
    )
)]
async fn reset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Task>>> {
    let task = state.repos.reset_repo(id).await?;
    Ok(ApiResponse::with_message("reset task submitted", task))
}

#[utoipa::path(delete, path = "/api/v1/repos/{id}",
    tag = "Repositories",
    params(("id" = i64, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Repository row deleted"),
        (status = 404, description = "Repository not found"),
    )
)]
async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<()>>> {
    state.repos.delete_repo(id).await?;
    Ok(ApiResponse::empty("repository deleted successfully"))
}

#[derive(OpenApi)]
#[openapi(
    paths(add_batch, list, get_one, get_branches, switch_branch, update, reset, remove),
    components(schemas(SwitchBranchRequest))
)]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/batch", post(add_batch))
        .route("/", get(list))
        .route("/:id", get(get_one).delete(remove))
        .route("/:id/branches", get(get_branches))
        .route("/:id/switch-branch", post(switch_branch))
        .route("/:id/update", post(update))
        .route("/:id/reset", post(reset))
}
