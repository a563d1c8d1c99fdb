//! Postgres-backed [`TweetStore`]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::{PostFilter, SegmentOutcome, ThreadFilter, TweetStore};
use crate::domain::accounts::{self, Account};
use crate::domain::twitter::{
    NewPost, NewThread, Post, PostedMetadata, Thread, ThreadProgress, ThreadWithPosts, posts,
    threads,
};
use crate::error::StoreResult;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn validate_posts(rows: Vec<Post>) -> StoreResult<Vec<Post>> {
    rows.into_iter().map(Post::validate).collect()
}

fn validate_threads(rows: Vec<Thread>) -> StoreResult<Vec<Thread>> {
    rows.into_iter().map(Thread::validate).collect()
}

#[async_trait]
impl TweetStore for PgStore {
    async fn list_active_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(accounts::list_active_accounts(&self.pool).await?)
    }

    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>> {
        Ok(accounts::get_account(&self.pool, account_id).await?)
    }

    async fn count_pending_posts(&self, account_id: i64) -> StoreResult<i64> {
        Ok(posts::count_pending_posts(&self.pool, account_id).await?)
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        posts::insert_post(&self.pool, &post).await?.validate()
    }

    async fn adopt_unowned(&self, account_id: i64) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let thread_rows = threads::adopt_unowned_threads(&mut *tx, account_id).await?;
        let post_rows = posts::adopt_unowned_posts(&mut *tx, account_id).await?;
        tx.commit().await?;
        Ok(thread_rows + post_rows)
    }

    async fn insert_thread(&self, thread: NewThread) -> StoreResult<ThreadWithPosts> {
        let mut tx = self.pool.begin().await?;

        let stored = threads::create_thread(&mut *tx, &thread).await?.validate()?;

        let mut stored_posts = Vec::with_capacity(thread.segments.len());
        for (idx, segment) in thread.segments.iter().enumerate() {
            let mut segment = segment.clone();
            segment.account_id = thread.account_id;
            segment.thread_id = Some(stored.id);
            segment.sequence = Some(idx as i32 + 1);
            stored_posts.push(posts::insert_post(&mut *tx, &segment).await?.validate()?);
        }

        tx.commit().await?;

        Ok(ThreadWithPosts {
            thread: stored,
            posts: stored_posts,
        })
    }

    async fn schedule_post(&self, post_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(posts::schedule_post(&self.pool, post_id, at).await?)
    }

    async fn schedule_thread(&self, thread_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(threads::schedule_thread(&self.pool, thread_id, at).await?)
    }

    async fn list_due_posts(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>> {
        validate_posts(posts::list_due_posts(&self.pool, account_id, from, until).await?)
    }

    async fn list_due_threads(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        validate_threads(threads::list_due_threads(&self.pool, account_id, from, until).await?)
    }

    async fn list_posts_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>> {
        validate_posts(posts::list_posts_needing_slot(&self.pool, account_id, before).await?)
    }

    async fn list_threads_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        validate_threads(threads::list_threads_needing_slot(&self.pool, account_id, before).await?)
    }

    async fn list_taken_slots(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        let mut taken = posts::list_post_slot_times(&self.pool, account_id, from).await?;
        taken.extend(threads::list_thread_slot_times(&self.pool, account_id, from).await?);
        taken.sort();
        Ok(taken)
    }

    async fn list_thread_posts(&self, thread_id: i64) -> StoreResult<Vec<Post>> {
        validate_posts(posts::list_thread_posts(&self.pool, thread_id).await?)
    }

    async fn claim_post(&self, post_id: i64, now: DateTime<Utc>, lease: Duration) -> StoreResult<bool> {
        Ok(posts::claim_post(&self.pool, post_id, now, now - lease).await?)
    }

    async fn mark_post_posted(&self, post_id: i64, meta: PostedMetadata) -> StoreResult<bool> {
        Ok(posts::mark_post_posted(&self.pool, post_id, &meta).await?)
    }

    async fn mark_post_failed(&self, post_id: i64, error: &str) -> StoreResult<bool> {
        Ok(posts::mark_post_failed(&self.pool, post_id, error).await?)
    }

    async fn claim_thread(
        &self,
        thread_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StoreResult<bool> {
        Ok(threads::claim_thread(&self.pool, thread_id, now, now - lease).await?)
    }

    async fn record_thread_step(
        &self,
        thread_id: i64,
        outcomes: Vec<SegmentOutcome>,
        progress: ThreadProgress,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for outcome in &outcomes {
            match &outcome.result {
                Ok(meta) => {
                    posts::mark_post_posted(&mut *tx, outcome.post_id, meta).await?;
                }
                Err(error) => {
                    posts::mark_post_failed(&mut *tx, outcome.post_id, error).await?;
                }
            }
        }
        threads::update_thread_progress(&mut *tx, thread_id, &progress).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_retryable_failed(&self, account_id: i64, max_attempts: i32) -> StoreResult<Vec<Post>> {
        validate_posts(posts::list_retryable_failed(&self.pool, account_id, max_attempts).await?)
    }

    async fn earliest_thread_wakeup(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(threads::earliest_thread_wakeup(&self.pool).await?)
    }

    async fn list_posts(&self, filter: PostFilter) -> StoreResult<Vec<Post>> {
        validate_posts(posts::list_posts(&self.pool, &filter).await?)
    }

    async fn list_threads(&self, filter: ThreadFilter) -> StoreResult<Vec<Thread>> {
        validate_threads(threads::list_threads(&self.pool, &filter).await?)
    }
}
