//! Thread domain - DB queries for threads
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use super::super::models::{NewThread, Thread, ThreadProgress, ThreadStatus};

const THREAD_COLUMNS: &str = "id, account_id, title, persona_key, category, total_tweets, \
     current_tweet, parent_external_id, status, next_post_time, last_error, \
     claimed_at, created_at";

/// Filter for thread listings
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    pub account_id: Option<i64>,
    pub status: Option<ThreadStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Create a thread row. Segments are inserted separately in the same
/// transaction.
pub async fn create_thread<'e, E>(executor: E, thread: &NewThread) -> Result<Thread, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"INSERT INTO threads (account_id, title, persona_key, category, total_tweets,
                                current_tweet, status, next_post_time)
           VALUES ($1, $2, $3, $4, $5, 0, 'ready', $6)
           RETURNING {}"#,
        THREAD_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(thread.account_id)
        .bind(&thread.title)
        .bind(&thread.persona_key)
        .bind(&thread.category)
        .bind(thread.segments.len() as i32)
        .bind(thread.next_post_time)
        .fetch_one(executor)
        .await
}

/// Assign threads stored without an account to `account_id`
pub async fn adopt_unowned_threads<'e, E>(executor: E, account_id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("UPDATE threads SET account_id = $1 WHERE account_id IS NULL")
        .bind(account_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Set the start time of a thread that has not begun posting
pub async fn schedule_thread<'e, E>(
    executor: E,
    thread_id: i64,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE threads
        SET next_post_time = $2
        WHERE id = $1 AND status = 'ready' AND claimed_at IS NULL
        "#,
    )
    .bind(thread_id)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Threads ready to start inside `[from, until]`, plus in-progress threads
/// whose next segment is due by `until`
pub async fn list_due_threads<'e, E>(
    executor: E,
    account_id: i64,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<Thread>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM threads
           WHERE account_id = $1
             AND ((status = 'ready' AND next_post_time BETWEEN $2 AND $3)
                  OR (status = 'posting' AND next_post_time <= $3))
           ORDER BY next_post_time ASC, id ASC"#,
        THREAD_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(from)
        .bind(until)
        .fetch_all(executor)
        .await
}

/// Threads that have not started and need a slot: no start time, or one
/// before `before`
pub async fn list_threads_needing_slot<'e, E>(
    executor: E,
    account_id: i64,
    before: DateTime<Utc>,
) -> Result<Vec<Thread>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM threads
           WHERE account_id = $1 AND status = 'ready' AND claimed_at IS NULL
             AND (next_post_time IS NULL OR next_post_time < $2)
           ORDER BY created_at ASC, id ASC"#,
        THREAD_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(account_id)
        .bind(before)
        .fetch_all(executor)
        .await
}

/// Start times held by threads of an account that have not begun posting
pub async fn list_thread_slot_times<'e, E>(
    executor: E,
    account_id: i64,
    from: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        SELECT next_post_time FROM threads
        WHERE account_id = $1 AND status = 'ready' AND next_post_time >= $2
        "#,
    )
    .bind(account_id)
    .bind(from)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(at,)| at).collect())
}

/// Claim a thread for posting (atomic - only one caller wins while the lease
/// is held). Moves a ready thread to posting.
pub async fn claim_thread<'e, E>(
    executor: E,
    thread_id: i64,
    now: DateTime<Utc>,
    lease_expired_before: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE threads
        SET status = 'posting', claimed_at = $2
        WHERE id = $1 AND status IN ('ready', 'posting')
          AND current_tweet < total_tweets
          AND (claimed_at IS NULL OR claimed_at < $3)
        "#,
    )
    .bind(thread_id)
    .bind(now)
    .bind(lease_expired_before)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Write thread progress and release the claim
pub async fn update_thread_progress<'e, E>(
    executor: E,
    thread_id: i64,
    progress: &ThreadProgress,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE threads
        SET current_tweet = $2,
            parent_external_id = COALESCE($3, parent_external_id),
            status = $4,
            next_post_time = $5,
            last_error = $6,
            claimed_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(thread_id)
    .bind(progress.current_tweet)
    .bind(&progress.parent_external_id)
    .bind(progress.status)
    .bind(progress.next_post_time)
    .bind(&progress.last_error)
    .execute(executor)
    .await?;
    Ok(())
}

/// Earliest pending wake-up across all unfinished threads
pub async fn earliest_thread_wakeup<'e, E>(
    executor: E,
) -> Result<Option<DateTime<Utc>>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (earliest,): (Option<DateTime<Utc>>,) = sqlx::query_as(
        r#"
        SELECT MIN(next_post_time) FROM threads
        WHERE status IN ('ready', 'posting') AND next_post_time IS NOT NULL
        "#,
    )
    .fetch_one(executor)
    .await?;

    Ok(earliest)
}

/// Filtered, paginated thread listing
pub async fn list_threads<'e, E>(
    executor: E,
    filter: &ThreadFilter,
) -> Result<Vec<Thread>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {} FROM threads
           WHERE ($1::BIGINT IS NULL OR account_id = $1)
             AND ($2::TEXT IS NULL OR status = $2)
           ORDER BY created_at DESC, id DESC
           LIMIT $3 OFFSET $4"#,
        THREAD_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(filter.account_id)
        .bind(filter.status)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(executor)
        .await
}
