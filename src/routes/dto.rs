//! API response DTOs for posts and threads

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::twitter::{Post, PostStatus, Thread, ThreadStatus};
use crate::engine::quality::QualityScore;

/// Post API response
#[derive(Debug, Clone, Serialize)]
pub struct PostResponse {
    pub id: i64,
    pub account_id: Option<i64>,
    pub content: String,
    pub hashtags: Vec<String>,
    pub persona_key: String,
    pub topic_key: Option<String>,
    pub thread_id: Option<i64>,
    pub sequence: Option<i32>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error_message: Option<String>,
    pub quality: Option<QualityScore>,
    pub attempt: i32,
    pub retry_of: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<Post> for PostResponse {
    fn from(p: Post) -> Self {
        Self {
            id: p.id,
            account_id: p.account_id,
            content: p.content,
            hashtags: p.hashtags,
            persona_key: p.persona_key,
            topic_key: p.topic_key,
            thread_id: p.thread_id,
            sequence: p.sequence,
            status: p.status,
            scheduled_at: p.scheduled_at,
            posted_at: p.posted_at,
            external_id: p.external_id,
            external_url: p.external_url,
            error_message: p.error_message,
            quality: p.quality.map(|q| q.0),
            attempt: p.attempt,
            retry_of: p.retry_of,
            created_at: p.created_at,
        }
    }
}

/// Thread API response
#[derive(Debug, Clone, Serialize)]
pub struct ThreadResponse {
    pub id: i64,
    pub account_id: Option<i64>,
    pub title: String,
    pub persona_key: String,
    pub category: Option<String>,
    pub total_tweets: i32,
    pub current_tweet: i32,
    pub status: ThreadStatus,
    pub next_post_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Thread> for ThreadResponse {
    fn from(t: Thread) -> Self {
        Self {
            id: t.id,
            account_id: t.account_id,
            title: t.title,
            persona_key: t.persona_key,
            category: t.category,
            total_tweets: t.total_tweets,
            current_tweet: t.current_tweet,
            status: t.status,
            next_post_time: t.next_post_time,
            last_error: t.last_error,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}
