//! Thread model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use std::str::FromStr;

use super::post::{NewPost, Post};
use crate::error::{StoreError, StoreResult};

/// Thread status enum: ready -> posting -> completed, or failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Ready,
    Posting,
    Completed,
    Failed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Ready => "ready",
            ThreadStatus::Posting => "posting",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
        }
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(ThreadStatus::Ready),
            "posting" => Ok(ThreadStatus::Posting),
            "completed" => Ok(ThreadStatus::Completed),
            "failed" => Ok(ThreadStatus::Failed),
            other => Err(format!("unknown thread status '{}'", other)),
        }
    }
}

// sqlx Type/Decode/Encode for ThreadStatus to enable FromRow on Thread
impl Type<Postgres> for ThreadStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for ThreadStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(s.parse::<ThreadStatus>()?)
    }
}

impl Encode<'_, Postgres> for ThreadStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// A multi-segment post container
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Thread {
    pub id: i64,
    pub account_id: Option<i64>,
    pub title: String,
    pub persona_key: String,
    pub category: Option<String>,
    pub total_tweets: i32,
    /// Number of segments already posted
    pub current_tweet: i32,
    /// External id of the most recently posted segment (reply anchor)
    pub parent_external_id: Option<String>,
    pub status: ThreadStatus,
    pub next_post_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn validate(self) -> StoreResult<Self> {
        if self.total_tweets < 1 || self.current_tweet < 0 || self.current_tweet > self.total_tweets {
            return Err(StoreError::InvalidRecord {
                entity: "thread",
                id: self.id,
                reason: format!(
                    "progress {}/{} out of bounds",
                    self.current_tweet, self.total_tweets
                ),
            });
        }
        Ok(self)
    }

    /// Failed, or stopped mid-chain with no wakeup. Its unposted segments
    /// will not go out without manual resolution.
    pub fn is_stalled(&self) -> bool {
        match self.status {
            ThreadStatus::Failed => true,
            ThreadStatus::Posting => self.next_post_time.is_none(),
            ThreadStatus::Ready | ThreadStatus::Completed => false,
        }
    }
}

/// Thread with its segments ordered by sequence
#[derive(Debug, Clone)]
pub struct ThreadWithPosts {
    pub thread: Thread,
    pub posts: Vec<Post>,
}

/// Insert payload for a thread; segments are inserted alongside it
#[derive(Debug, Clone)]
pub struct NewThread {
    pub account_id: Option<i64>,
    pub title: String,
    pub persona_key: String,
    pub category: Option<String>,
    pub next_post_time: Option<DateTime<Utc>>,
    pub segments: Vec<NewPost>,
}

/// Progress update written after each posting step
#[derive(Debug, Clone)]
pub struct ThreadProgress {
    pub current_tweet: i32,
    pub parent_external_id: Option<String>,
    pub status: ThreadStatus,
    pub next_post_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
