//! Posting executor: claim, publish, record.
//!
//! A claim is a conditional update that only one caller wins while its lease
//! is held, so only the claimant ever calls the publisher. Threads are
//! recorded local-after-remote in a single store step: every segment that
//! went out is recorded before the failure that stopped the chain.

use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::twitter::{Post, PostedMetadata, Thread, ThreadProgress, ThreadStatus};
use crate::error::{PublishError, StoreResult};
use crate::services::{PartialPublish, PublishRequest, Published, Publisher};
use crate::store::{SegmentOutcome, TweetStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// One `publish_thread` call per thread
    Atomic,
    /// One segment per due invocation
    Sequential,
}

impl FromStr for ThreadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" => Ok(ThreadMode::Atomic),
            "sequential" => Ok(ThreadMode::Sequential),
            other => Err(format!("unknown thread mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Per segment
    pub publish_timeout: std::time::Duration,
    pub claim_lease: Duration,
    pub thread_mode: ThreadMode,
    /// Delay between segments in sequential mode
    pub segment_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            publish_timeout: std::time::Duration::from_secs(15),
            claim_lease: Duration::seconds(crate::constants::DEFAULT_CLAIM_LEASE_SECS),
            thread_mode: ThreadMode::Atomic,
            segment_delay: Duration::minutes(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Posted(Published),
    Failed(String),
    /// Another caller holds the claim, or the post is no longer publishable
    NotClaimed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub thread_id: i64,
    /// Segments posted during this step
    pub posted: usize,
    pub error: Option<String>,
    pub status: ThreadStatus,
    pub claimed: bool,
}

pub struct PostingExecutor {
    store: Arc<dyn TweetStore>,
    publisher: Arc<dyn Publisher>,
    config: ExecutorConfig,
}

impl PostingExecutor {
    pub fn new(store: Arc<dyn TweetStore>, publisher: Arc<dyn Publisher>, config: ExecutorConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn publish_one(&self, request: PublishRequest) -> Result<Published, PublishError> {
        match timeout(self.config.publish_timeout, self.publisher.publish(request)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.config.publish_timeout.as_secs())),
        }
    }

    /// Publish a standalone post. No internal retry.
    pub async fn post(&self, post: &Post, now: DateTime<Utc>) -> StoreResult<PostOutcome> {
        if !self.store.claim_post(post.id, now, self.config.claim_lease).await? {
            debug!(post_id = post.id, "Post not claimed, skipping");
            return Ok(PostOutcome::NotClaimed);
        }

        let request = PublishRequest {
            account_id: post.account_id,
            text: post.content.clone(),
            reply_to: post.parent_external_id.clone(),
        };

        match self.publish_one(request).await {
            Ok(published) => {
                let meta = PostedMetadata {
                    external_id: published.id.clone(),
                    external_url: published.url.clone(),
                    parent_external_id: post.parent_external_id.clone(),
                    posted_at: Utc::now(),
                };
                if let Err(e) = self.store.mark_post_posted(post.id, meta).await {
                    error!(
                        post_id = post.id,
                        external_id = %published.id,
                        error = %e,
                        "Post published but recording failed"
                    );
                    return Err(e);
                }
                info!(post_id = post.id, external_id = %published.id, "Post published");
                Ok(PostOutcome::Posted(published))
            }
            Err(e) => {
                let message = e.to_string();
                self.store.mark_post_failed(post.id, &message).await?;
                warn!(post_id = post.id, error = %message, "Post publish failed");
                Ok(PostOutcome::Failed(message))
            }
        }
    }

    /// Advance a due thread according to the configured [`ThreadMode`].
    pub async fn post_thread(&self, thread: &Thread, now: DateTime<Utc>) -> StoreResult<ThreadOutcome> {
        if !self
            .store
            .claim_thread(thread.id, now, self.config.claim_lease)
            .await?
        {
            debug!(thread_id = thread.id, "Thread not claimed, skipping");
            return Ok(ThreadOutcome {
                thread_id: thread.id,
                posted: 0,
                error: None,
                status: thread.status,
                claimed: false,
            });
        }

        let remaining: Vec<Post> = self
            .store
            .list_thread_posts(thread.id)
            .await?
            .into_iter()
            .filter(|p| p.status.is_publishable())
            .collect();

        let step = match self.config.thread_mode {
            ThreadMode::Atomic => remaining.as_slice(),
            ThreadMode::Sequential => &remaining[..remaining.len().min(1)],
        };

        let (published, last_error) = if step.is_empty() {
            (Vec::new(), None)
        } else {
            self.publish_segments(thread, step).await
        };

        let posted = published.len();
        let mut outcomes = Vec::with_capacity(posted + 1);
        let mut parent = thread.parent_external_id.clone();
        for (segment, published) in step.iter().zip(&published) {
            outcomes.push(SegmentOutcome {
                post_id: segment.id,
                result: Ok(PostedMetadata {
                    external_id: published.id.clone(),
                    external_url: published.url.clone(),
                    parent_external_id: parent.clone(),
                    posted_at: Utc::now(),
                }),
            });
            parent = Some(published.id.clone());
        }

        // The segment after the last success carries the error; later ones stay untouched
        if let (Some(message), Some(failed)) = (&last_error, step.get(posted)) {
            outcomes.push(SegmentOutcome {
                post_id: failed.id,
                result: Err(message.clone()),
            });
        }

        let current = thread.current_tweet + posted as i32;
        let (status, next_post_time) = if current >= thread.total_tweets {
            (ThreadStatus::Completed, None)
        } else if last_error.is_some() {
            if current == 0 {
                (ThreadStatus::Failed, None)
            } else {
                (ThreadStatus::Posting, None)
            }
        } else {
            (ThreadStatus::Posting, Some(now + self.config.segment_delay))
        };

        let progress = ThreadProgress {
            current_tweet: current,
            parent_external_id: parent,
            status,
            next_post_time,
            last_error: last_error.clone(),
        };
        if let Err(e) = self.store.record_thread_step(thread.id, outcomes, progress).await {
            let external_ids: Vec<&str> = published.iter().map(|p| p.id.as_str()).collect();
            error!(
                thread_id = thread.id,
                external_ids = ?external_ids,
                error = %e,
                "Thread segments published but recording failed"
            );
            return Err(e);
        }

        match &last_error {
            Some(message) => warn!(
                thread_id = thread.id,
                posted,
                progress = current,
                total = thread.total_tweets,
                status = status.as_str(),
                error = %message,
                "Thread step stopped on error"
            ),
            None => info!(
                thread_id = thread.id,
                posted,
                progress = current,
                total = thread.total_tweets,
                status = status.as_str(),
                "Thread step complete"
            ),
        }

        Ok(ThreadOutcome {
            thread_id: thread.id,
            posted,
            error: last_error,
            status,
            claimed: true,
        })
    }

    async fn publish_segments(&self, thread: &Thread, step: &[Post]) -> (Vec<Published>, Option<String>) {
        let texts: Vec<String> = step.iter().map(|p| p.content.clone()).collect();
        match self
            .publisher
            .publish_thread(
                thread.account_id,
                &texts,
                thread.parent_external_id.clone(),
                self.config.publish_timeout,
            )
            .await
        {
            Ok(all) => (all, None),
            Err(PartialPublish { completed, error }) => (completed, Some(error.to_string())),
        }
    }
}
