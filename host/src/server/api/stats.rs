use axum::{
    extract::{Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{IntoParams, OpenApi};

use gitstat_lib::{StatsCacheStore, StatsResult, Task};

use crate::{
    interfaces::{ApiResponse, HostResult},
    service::{CalculateRequest, CommitCountResponse, QueryResultRequest},
    AppState,
};

const DEFAULT_CACHE_LIMIT: u32 = 50;
const MAX_CACHE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResultQuery {
    pub repo_id: Option<i64>,
    pub branch: Option<String>,
    pub constraint_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CommitCountQuery {
    pub repo_id: Option<i64>,
    pub branch: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCachesQuery {
    pub repo_id: Option<i64>,
    pub limit: Option<u32>,
}

#[utoipa::path(post, path = "/api/v1/stats/calculate",
    tag = "Statistics",
    request_body = CalculateRequest,
    responses(
        (status = 200, description = "Stats task submitted; identical submissions return the existing task", body = Task),
        (status = 400, description = "Invalid constraint"),
    )
)]
async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<CalculateRequest>,
) -> HostResult<Json<ApiResponse<Task>>> {
    let task = state.stats.calculate(&request).await?;
    Ok(ApiResponse::with_message("statistics task submitted", task))
}

#[utoipa::path(get, path = "/api/v1/stats/result",
    tag = "Statistics",
    params(ResultQuery),
    responses(
        (status = 200, description = "Cached statistics for the live HEAD", body = StatsResult),
        (status = 404, description = "No cached result; submit a calculation first"),
    )
)]
async fn query_result(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> HostResult<Json<ApiResponse<StatsResult>>> {
    let request = QueryResultRequest {
        repo_id: query.repo_id.unwrap_or(0),
        branch: query.branch.unwrap_or_default(),
        constraint_type: query.constraint_type.unwrap_or_default(),
        from: query.from,
        to: query.to,
        limit: query.limit,
    };
    let result = state.stats.query_result(&request).await?;
    Ok(ApiResponse::ok(result))
}

#[utoipa::path(get, path = "/api/v1/stats/commit-count",
    tag = "Statistics",
    params(CommitCountQuery),
    responses(
        (status = 200, description = "Commit count from the optional from-date to HEAD", body = CommitCountResponse),
    )
)]
async fn commit_count(
    State(state): State<AppState>,
    Query(query): Query<CommitCountQuery>,
) -> HostResult<Json<ApiResponse<CommitCountResponse>>> {
    let response = state
        .stats
        .count_commits(
            query.repo_id.unwrap_or(0),
            query.branch.as_deref().unwrap_or(""),
            query.from.as_deref().filter(|s| !s.is_empty()),
        )
        .await?;
    Ok(ApiResponse::ok(response))
}

#[utoipa::path(get, path = "/api/v1/stats/caches",
    tag = "Statistics",
    params(ListCachesQuery),
    responses(
        (status = 200, description = "Cache metadata rows, newest first"),
    )
)]
async fn list_caches(
    State(state): State<AppState>,
    Query(query): Query<ListCachesQuery>,
) -> HostResult<Json<ApiResponse<Value>>> {
    let limit = query
        .limit
        .filter(|l| *l > 0 && *l <= MAX_CACHE_LIMIT)
        .unwrap_or(DEFAULT_CACHE_LIMIT);
    let (caches, total) = state.store.list_stats_caches(query.repo_id, limit).await?;
    Ok(ApiResponse::ok(json!({
        "caches": caches,
        "total": total,
    })))
}

#[utoipa::path(delete, path = "/api/v1/stats/caches/clear",
    tag = "Statistics",
    responses(
        (status = 200, description = "All cache rows removed; artifact files are reaped lazily"),
    )
)]
async fn clear_caches(State(state): State<AppState>) -> HostResult<Json<ApiResponse<()>>> {
    state.store.delete_all_stats_caches().await?;
    Ok(ApiResponse::empty("all stats caches cleared"))
}

#[derive(OpenApi)]
#[openapi(paths(calculate, query_result, commit_count, list_caches, clear_caches))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/calculate", post(calculate))
        .route("/result", get(query_result))
        .route("/commit-count", get(commit_count))
        .route("/caches", get(list_caches))
        .route("/caches/clear", delete(clear_caches))
}
