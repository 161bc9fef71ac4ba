use axum::Json;
use serde_json::{json, Value};
use utoipa::OpenApi;

#[utoipa::path(get, path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

#[derive(OpenApi)]
#[openapi(paths(healthz))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}
