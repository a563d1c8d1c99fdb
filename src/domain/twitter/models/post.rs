//! Post model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use sqlx::{Decode, Encode, Postgres, Type};
use std::str::FromStr;

use crate::engine::quality::QualityScore;
use crate::error::{StoreError, StoreResult};

/// Post lifecycle: draft -> ready -> scheduled -> posted, or failed from any
/// pre-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Ready,
    Scheduled,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Ready => "ready",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }

    /// Counts towards pipeline depth.
    pub fn is_pending(&self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Ready | PostStatus::Scheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Posted | PostStatus::Failed)
    }

    /// Statuses from which the executor may claim a post for publishing.
    pub fn is_publishable(&self) -> bool {
        matches!(self, PostStatus::Ready | PostStatus::Scheduled)
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "ready" => Ok(PostStatus::Ready),
            "scheduled" => Ok(PostStatus::Scheduled),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status '{}'", other)),
        }
    }
}

// Stored as TEXT; unknown values are rejected at decode time
impl Type<Postgres> for PostStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PostStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(s.parse::<PostStatus>()?)
    }
}

impl Encode<'_, Postgres> for PostStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// A post (standalone or one segment of a thread)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    /// `None` in legacy single-account mode
    pub account_id: Option<i64>,
    pub content: String,
    pub hashtags: Vec<String>,
    pub persona_key: String,
    pub topic_key: Option<String>,
    pub thread_id: Option<i64>,
    /// 1-based position inside the thread
    pub sequence: Option<i32>,
    /// External id of the post this one replies to
    pub parent_external_id: Option<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error_message: Option<String>,
    pub quality: Option<Json<QualityScore>>,
    pub attempt: i32,
    pub retry_of: Option<i64>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Reject rows that decode but break model invariants.
    pub fn validate(self) -> StoreResult<Self> {
        let invalid = |reason: String| StoreError::InvalidRecord {
            entity: "post",
            id: self.id,
            reason,
        };

        if self.attempt < 1 {
            return Err(invalid(format!("attempt {} < 1", self.attempt)));
        }
        match (self.thread_id, self.sequence) {
            (Some(_), None) => return Err(invalid("thread segment without sequence".into())),
            (_, Some(seq)) if seq < 1 => return Err(invalid(format!("sequence {} < 1", seq))),
            _ => {}
        }
        if self.status == PostStatus::Posted && self.external_id.is_none() {
            return Err(invalid("posted without external id".into()));
        }
        Ok(self)
    }

    pub fn quality_score(&self) -> Option<&QualityScore> {
        self.quality.as_ref().map(|q| &q.0)
    }
}

/// Insert payload for a post
#[derive(Debug, Clone)]
pub struct NewPost {
    pub account_id: Option<i64>,
    pub content: String,
    pub hashtags: Vec<String>,
    pub persona_key: String,
    pub topic_key: Option<String>,
    pub thread_id: Option<i64>,
    pub sequence: Option<i32>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub quality: Option<QualityScore>,
    pub attempt: i32,
    pub retry_of: Option<i64>,
}

impl NewPost {
    /// A fresh, first-attempt post in `ready` state.
    pub fn ready(account_id: Option<i64>, content: String, persona_key: &str) -> Self {
        Self {
            account_id,
            content,
            hashtags: Vec::new(),
            persona_key: persona_key.to_string(),
            topic_key: None,
            thread_id: None,
            sequence: None,
            status: PostStatus::Ready,
            scheduled_at: None,
            quality: None,
            attempt: 1,
            retry_of: None,
        }
    }

    /// A new attempt for a failed standalone post.
    pub fn retry_of(failed: &Post, scheduled_at: Option<DateTime<Utc>>) -> Self {
        Self {
            account_id: failed.account_id,
            content: failed.content.clone(),
            hashtags: failed.hashtags.clone(),
            persona_key: failed.persona_key.clone(),
            topic_key: failed.topic_key.clone(),
            thread_id: None,
            sequence: None,
            status: if scheduled_at.is_some() {
                PostStatus::Scheduled
            } else {
                PostStatus::Ready
            },
            scheduled_at,
            quality: failed.quality_score().cloned(),
            attempt: failed.attempt + 1,
            retry_of: Some(failed.id),
        }
    }
}

/// Result of a successful publish, recorded on the post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMetadata {
    pub external_id: String,
    pub external_url: Option<String>,
    pub parent_external_id: Option<String>,
    pub posted_at: DateTime<Utc>,
}
