pub mod accounts;
mod dto;
pub mod orchestrator;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(orchestrator::routes())
        .merge(accounts::routes())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orchestrator_running: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orchestrator_running: state.orchestrator.is_running(),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{app, call};
    use crate::testing::MemoryStore;
    use axum::http::{Method, StatusCode};
    use std::sync::Arc;

    #[tokio::test]
    async fn health_reports_ok() {
        let (router, _) = app(Arc::new(MemoryStore::new()));
        let (status, body) = call(router, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["orchestrator_running"], false);
    }
}
