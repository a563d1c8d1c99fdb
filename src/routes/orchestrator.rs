//! Orchestrator trigger endpoints (/orchestrator/*)

use axum::{Json, Router, extract::State, http::StatusCode, routing::{get, post}};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::engine::orchestrator::{RunSummary, RunTotals, TriggerMode};
use crate::error::OrchestratorError;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orchestrator/run", post(run_orchestrator))
        .route("/orchestrator/next", get(next_run))
}

#[derive(Serialize)]
struct RunResponse {
    totals: RunTotals,
    #[serde(flatten)]
    summary: RunSummary,
}

/// POST /orchestrator/run - Run one orchestration pass now
async fn run_orchestrator(State(state): State<Arc<AppState>>) -> Result<Json<RunResponse>, StatusCode> {
    let summary = match state.orchestrator.run_once(TriggerMode::Manual).await {
        Err(OrchestratorError::AlreadyRunning) => return Err(StatusCode::CONFLICT),
        result => result.log_500("Orchestrator run error")?,
    };

    Ok(Json(RunResponse {
        totals: summary.totals(),
        summary,
    }))
}

#[derive(Serialize)]
struct NextRunResponse {
    next_run_at: DateTime<Utc>,
    delay_secs: u64,
    jitter_secs: i64,
    running: bool,
}

/// GET /orchestrator/next - When the timer would fire next
async fn next_run(State(state): State<Arc<AppState>>) -> Result<Json<NextRunResponse>, StatusCode> {
    let next = state
        .orchestrator
        .next_run(Utc::now())
        .await
        .log_500("Next run error")?;

    Ok(Json(NextRunResponse {
        next_run_at: next.at,
        delay_secs: next.delay.as_secs(),
        jitter_secs: next.jitter_secs,
        running: state.orchestrator.is_running(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::domain::twitter::NewPost;
    use crate::routes::test_support::{app, call};
    use crate::store::TweetStore;
    use crate::testing::{MemoryStore, account};
    use axum::http::{Method, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn run_returns_summary_with_totals() {
        let store = Arc::new(MemoryStore::with_accounts(vec![account(1)]));
        let mut post = NewPost::ready(Some(1), "due now".into(), "analyst");
        post.status = crate::domain::twitter::PostStatus::Scheduled;
        post.scheduled_at = Some(Utc::now());
        store.insert_post(post).await.unwrap();

        let (router, _) = app(store);
        let (status, body) = call(router, Method::POST, "/orchestrator/run").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trigger"], "manual");
        assert_eq!(body["totals"]["posted"], 1);
        assert_eq!(body["accounts"][0]["account_id"], 1);
    }

    #[tokio::test]
    async fn run_conflicts_while_in_progress() {
        let (router, state) = app(Arc::new(MemoryStore::new()));
        let orchestrator = state.orchestrator.clone();

        let _held = orchestrator.hold_for_test().await;
        let (status, _) = call(router, Method::POST, "/orchestrator/run").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn next_run_is_in_the_future() {
        let (router, _) = app(Arc::new(MemoryStore::new()));
        let (status, body) = call(router, Method::GET, "/orchestrator/next").await;
        assert_eq!(status, StatusCode::OK);
        let at: chrono::DateTime<Utc> = serde_json::from_value(body["next_run_at"].clone()).unwrap();
        assert!(at > Utc::now());
        assert_eq!(body["running"], false);
    }
}
