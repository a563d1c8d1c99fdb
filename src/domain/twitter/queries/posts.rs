//! Post domain - DB queries for posts
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};

use super::super::models::{NewPost, Post, PostStatus, PostedMetadata};

const POST_COLUMNS: &str = "id, account_id, content, hashtags, persona_key, topic_key, \
     thread_id, sequence, parent_external_id, status, scheduled_at, posted_at, \
     external_id, external_url, error_message, quality, attempt, retry_of, \
     claimed_at, created_at";

/// Filter for post listings
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub account_id: Option<i64>,
    pub status: Option<PostStatus>,
    pub standalone_only: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Count pending posts (draft, ready, scheduled) for an account. Segments
/// of failed or stalled threads do not count.
pub async fn count_pending_posts<'e, E>(executor: E, account_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM posts p
        WHERE p.account_id = $1
          AND p.status IN ('draft', 'ready', 'scheduled')
          AND NOT EXISTS (
              SELECT 1 FROM threads t
              WHERE t.id = p.thread_id
                AND (t.status = 'failed' OR (t.status = 'posting' AND t.next_post_time IS NULL))
          )
        "#,
    )
    .bind(account_id)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Assign posts stored without an account to `account_id`
pub async fn adopt_unowned_posts<'e, E>(executor: E, account_id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("UPDATE posts SET account_id = $1 WHERE account_id IS NULL")
        .bind(account_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Insert a post, returning the stored row
pub async fn insert_post<'e, E>(executor: E, post: &NewPost) -> Result<Post, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"INSERT INTO posts (account_id, content, hashtags, persona_key, topic_key,
                              thread_id, sequence, status, scheduled_at, quality,
                              attempt, retry_of)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
           RETURNING {}"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(post.account_id)
        .bind(&post.content)
        .bind(&post.hashtags)
        .bind(&post.persona_key)
        .bind(&post.topic_key)
        .bind(post.thread_id)
        .bind(post.sequence)
        .bind(post.status)
        .bind(post.scheduled_at)
        .bind(post.quality.clone().map(Json))
        .bind(post.attempt)
        .bind(post.retry_of)
        .fetch_one(executor)
        .await
}

/// Assign a slot to a standalone pending post. Returns false if the post is
/// no longer schedulable.
pub async fn schedule_post<'e, E>(
    executor: E,
    post_id: i64,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET status = 'scheduled', scheduled_at = $2
        WHERE id = $1 AND status IN ('ready', 'scheduled') AND claimed_at IS NULL
        "#,
    )
    .bind(post_id)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Standalone scheduled posts whose slot falls inside `[from, until]`
pub async fn list_due_posts<'e, E>(
    executor: E,
    account_id: i64,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM posts
           WHERE account_id = $1 AND thread_id IS NULL AND status = 'scheduled'
             AND scheduled_at BETWEEN $2 AND $3
           ORDER BY scheduled_at ASC, id ASC"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(from)
        .bind(until)
        .fetch_all(executor)
        .await
}

/// Standalone posts that need a slot: ready without a time, or scheduled
/// before `before`
pub async fn list_posts_needing_slot<'e, E>(
    executor: E,
    account_id: i64,
    before: DateTime<Utc>,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM posts
           WHERE account_id = $1 AND thread_id IS NULL AND claimed_at IS NULL
             AND ((status = 'ready' AND scheduled_at IS NULL)
                  OR (status IN ('ready', 'scheduled') AND scheduled_at < $2))
           ORDER BY created_at ASC, id ASC"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(before)
        .fetch_all(executor)
        .await
}

/// Slot times already held by pending standalone posts of an account
pub async fn list_post_slot_times<'e, E>(
    executor: E,
    account_id: i64,
    from: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        SELECT scheduled_at FROM posts
        WHERE account_id = $1 AND thread_id IS NULL
          AND status IN ('ready', 'scheduled') AND scheduled_at >= $2
        "#,
    )
    .bind(account_id)
    .bind(from)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(at,)| at).collect())
}

/// Claim a post for publishing (atomic - only one caller wins while the
/// lease is held)
pub async fn claim_post<'e, E>(
    executor: E,
    post_id: i64,
    now: DateTime<Utc>,
    lease_expired_before: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET claimed_at = $2
        WHERE id = $1 AND status IN ('ready', 'scheduled')
          AND (claimed_at IS NULL OR claimed_at < $3)
        "#,
    )
    .bind(post_id)
    .bind(now)
    .bind(lease_expired_before)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a post as posted (atomic - never reopens a terminal post)
pub async fn mark_post_posted<'e, E>(
    executor: E,
    post_id: i64,
    meta: &PostedMetadata,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET status = 'posted',
            posted_at = $2,
            external_id = $3,
            external_url = $4,
            parent_external_id = $5,
            error_message = NULL,
            claimed_at = NULL
        WHERE id = $1 AND status NOT IN ('posted', 'failed')
        "#,
    )
    .bind(post_id)
    .bind(meta.posted_at)
    .bind(&meta.external_id)
    .bind(&meta.external_url)
    .bind(&meta.parent_external_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a post publish attempt as failed
pub async fn mark_post_failed<'e, E>(
    executor: E,
    post_id: i64,
    error: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET status = 'failed', error_message = $2, claimed_at = NULL
        WHERE id = $1 AND status NOT IN ('posted', 'failed')
        "#,
    )
    .bind(post_id)
    .bind(error)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Failed standalone posts that may get another attempt and have none yet
pub async fn list_retryable_failed<'e, E>(
    executor: E,
    account_id: i64,
    max_attempts: i32,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM posts
           WHERE account_id = $1 AND thread_id IS NULL AND status = 'failed'
             AND attempt < $2
             AND NOT EXISTS (SELECT 1 FROM posts r WHERE r.retry_of = posts.id)
           ORDER BY id ASC"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(max_attempts)
        .fetch_all(executor)
        .await
}

/// Segments of a thread in sequence order
pub async fn list_thread_posts<'e, E>(executor: E, thread_id: i64) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM posts WHERE thread_id = $1 ORDER BY sequence ASC",
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(thread_id)
        .fetch_all(executor)
        .await
}

/// Filtered, paginated post listing
pub async fn list_posts<'e, E>(executor: E, filter: &PostFilter) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM posts
           WHERE ($1::BIGINT IS NULL OR account_id = $1)
             AND ($2::TEXT IS NULL OR status = $2)
             AND (NOT $3 OR thread_id IS NULL)
           ORDER BY created_at DESC, id DESC
           LIMIT $4 OFFSET $5"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(filter.account_id)
        .bind(filter.status)
        .bind(filter.standalone_only)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(executor)
        .await
}
