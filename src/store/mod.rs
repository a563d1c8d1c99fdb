//! Durable storage seam for accounts, posts and threads.
//!
//! [`TweetStore`] is the only way the engine touches persistence. The
//! Postgres implementation lives in [`postgres`]; tests use an in-memory
//! store. Every record crossing this boundary has been validated.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::Account;
use crate::domain::twitter::{NewPost, NewThread, Post, PostedMetadata, Thread, ThreadProgress, ThreadWithPosts};
use crate::error::StoreResult;

pub use crate::domain::twitter::posts::PostFilter;
pub use crate::domain::twitter::threads::ThreadFilter;
pub use postgres::PgStore;

/// Result of posting one thread segment, recorded together with progress
#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub post_id: i64,
    pub result: Result<PostedMetadata, String>,
}

#[async_trait]
pub trait TweetStore: Send + Sync {
    async fn list_active_accounts(&self) -> StoreResult<Vec<Account>>;

    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>>;

    /// Posts of the account in draft, ready or scheduled, excluding
    /// segments of stalled threads
    async fn count_pending_posts(&self, account_id: i64) -> StoreResult<i64>;

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post>;

    /// Give every post and thread stored without an account to `account_id`.
    /// Returns the number of rows changed.
    async fn adopt_unowned(&self, account_id: i64) -> StoreResult<u64>;

    /// Insert a thread and all its segments atomically.
    async fn insert_thread(&self, thread: NewThread) -> StoreResult<ThreadWithPosts>;

    async fn schedule_post(&self, post_id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn schedule_thread(&self, thread_id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn list_due_posts(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>>;

    async fn list_due_threads(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>>;

    /// Standalone posts without a slot or with a slot before `before`
    async fn list_posts_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>>;

    /// Unstarted threads without a start time or with one before `before`
    async fn list_threads_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>>;

    /// Slot times at or after `from` already held by the account's pending work
    async fn list_taken_slots(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>>;

    async fn list_thread_posts(&self, thread_id: i64) -> StoreResult<Vec<Post>>;

    async fn claim_post(&self, post_id: i64, now: DateTime<Utc>, lease: Duration) -> StoreResult<bool>;

    async fn mark_post_posted(&self, post_id: i64, meta: PostedMetadata) -> StoreResult<bool>;

    async fn mark_post_failed(&self, post_id: i64, error: &str) -> StoreResult<bool>;

    async fn claim_thread(
        &self,
        thread_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StoreResult<bool>;

    /// Record segment outcomes and thread progress in one unit, releasing
    /// the thread claim.
    async fn record_thread_step(
        &self,
        thread_id: i64,
        outcomes: Vec<SegmentOutcome>,
        progress: ThreadProgress,
    ) -> StoreResult<()>;

    async fn list_retryable_failed(&self, account_id: i64, max_attempts: i32) -> StoreResult<Vec<Post>>;

    async fn earliest_thread_wakeup(&self) -> StoreResult<Option<DateTime<Utc>>>;

    async fn list_posts(&self, filter: PostFilter) -> StoreResult<Vec<Post>>;

    async fn list_threads(&self, filter: ThreadFilter) -> StoreResult<Vec<Thread>>;
}
