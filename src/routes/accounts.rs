//! Read-only account listings (/accounts/:id/*)

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use super::dto::{Page, PostResponse, ThreadResponse};
use crate::AppState;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::twitter::{PostStatus, ThreadStatus};
use crate::services::error::LogErr;
use crate::store::{PostFilter, ThreadFilter};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts/{id}/posts", get(list_posts))
        .route("/accounts/{id}/threads", get(list_threads))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    offset: i64,
    /// Posts only: exclude thread segments
    #[serde(default)]
    standalone: bool,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn offset(&self) -> i64 {
        self.offset.max(0)
    }
}

async fn ensure_account(state: &AppState, account_id: i64) -> Result<(), StatusCode> {
    state
        .store
        .get_account(account_id)
        .await
        .log_500("Get account error")?
        .map(|_| ())
        .ok_or(StatusCode::NOT_FOUND)
}

/// Fetch one extra row to learn whether another page exists
fn page<T>(mut items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let has_more = items.len() as i64 > limit;
    items.truncate(limit as usize);
    Page {
        items,
        limit,
        offset,
        has_more,
    }
}

/// GET /accounts/:id/posts - Posts of an account, newest first
async fn list_posts(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<PostResponse>>, StatusCode> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<PostStatus>)
        .transpose()
        .log_status("Invalid post status filter", StatusCode::BAD_REQUEST)?;
    ensure_account(&state, account_id).await?;

    let (limit, offset) = (query.limit(), query.offset());
    let posts = state
        .store
        .list_posts(PostFilter {
            account_id: Some(account_id),
            status,
            standalone_only: query.standalone,
            limit: limit + 1,
            offset,
        })
        .await
        .log_500("List posts error")?;

    Ok(Json(page(
        posts.into_iter().map(Into::into).collect(),
        limit,
        offset,
    )))
}

/// GET /accounts/:id/threads - Threads of an account, newest first
async fn list_threads(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ThreadResponse>>, StatusCode> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ThreadStatus>)
        .transpose()
        .log_status("Invalid thread status filter", StatusCode::BAD_REQUEST)?;
    ensure_account(&state, account_id).await?;

    let (limit, offset) = (query.limit(), query.offset());
    let threads = state
        .store
        .list_threads(ThreadFilter {
            account_id: Some(account_id),
            status,
            limit: limit + 1,
            offset,
        })
        .await
        .log_500("List threads error")?;

    Ok(Json(page(
        threads.into_iter().map(Into::into).collect(),
        limit,
        offset,
    )))
}
