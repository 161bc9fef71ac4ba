use axum::{
    http::{header, HeaderName, Method},
    routing::get,
    Router,
};
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

mod health;
mod repos;
mod stats;
mod tasks;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gitstat Server API",
        version = "1.0",
        description = "Repository ingestion and per-contributor code statistics",
    ),
    components(
        schemas(
            gitstat_lib::Repository,
            gitstat_lib::RepoStatus,
            gitstat_lib::Task,
            gitstat_lib::TaskType,
            gitstat_lib::TaskStatus,
            gitstat_lib::TaskParameters,
            gitstat_lib::TaskResult,
            gitstat_lib::ConstraintSpec,
            gitstat_lib::StatsConstraint,
            gitstat_lib::Statistics,
            gitstat_lib::StatsSummary,
            gitstat_lib::ContributorStats,
            gitstat_lib::DateRange,
            gitstat_lib::StatsResult,
            gitstat_lib::StatsCache,
            crate::service::RepoInput,
            crate::service::AddReposRequest,
            crate::service::AddReposResponse,
            crate::service::AddRepoResult,
            crate::service::AddRepoFailure,
            crate::service::CalculateRequest,
            crate::service::CommitCountResponse,
        )
    ),
    tags(
        (name = "Repositories", description = "Repository lifecycle management"),
        (name = "Statistics", description = "Contributor statistics and the result cache"),
        (name = "Tasks", description = "Asynchronous task inspection"),
        (name = "Health", description = "Service health"),
    )
)]
struct Docs;

#[must_use]
pub fn create_docs() -> utoipa::openapi::OpenApi {
    [
        health::create_docs(),
        repos::create_docs(),
        stats::create_docs(),
        tasks::create_docs(),
    ]
    .into_iter()
    .fold(Docs::openapi(), |mut doc, sub_doc| {
        doc.merge(sub_doc);
        doc
    })
}

pub fn create_router() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_origin(cors::Any);

    Router::new()
        .route("/health", get(health::healthz))
        .nest("/api/v1/repos", repos::create_router())
        .nest("/api/v1/stats", stats::create_router())
        .nest("/api/v1/tasks", tasks::create_router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", create_docs()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
