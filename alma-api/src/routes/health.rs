use axum::Json;

use alma_shared::types::api::HealthResponse;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy("alma-api", env!("CARGO_PKG_VERSION")))
}
