//! Publisher seam: posts final text and reports the external id.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::PublishError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub account_id: Option<i64>,
    pub text: String,
    /// External id of the post to reply to
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub id: String,
    pub url: Option<String>,
}

/// A reply chain that stopped part-way: `completed` holds every segment that
/// went out, in order.
#[derive(Debug)]
pub struct PartialPublish {
    pub completed: Vec<Published>,
    pub error: PublishError,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<Published, PublishError>;

    /// Post `texts` as a reply chain. Segment i replies to segment i-1; the
    /// first segment replies to `reply_to` when given. Each segment gets
    /// `per_segment` to complete; a timeout stops the chain like any other
    /// error, keeping the segments that already went out.
    async fn publish_thread(
        &self,
        account_id: Option<i64>,
        texts: &[String],
        reply_to: Option<String>,
        per_segment: Duration,
    ) -> Result<Vec<Published>, PartialPublish> {
        let mut completed: Vec<Published> = Vec::with_capacity(texts.len());
        let mut parent = reply_to;

        for text in texts {
            let request = PublishRequest {
                account_id,
                text: text.clone(),
                reply_to: parent.clone(),
            };
            let error = match timeout(per_segment, self.publish(request)).await {
                Ok(Ok(published)) => {
                    parent = Some(published.id.clone());
                    completed.push(published);
                    continue;
                }
                Ok(Err(error)) => error,
                Err(_) => PublishError::Timeout(per_segment.as_secs()),
            };
            return Err(PartialPublish { completed, error });
        }

        Ok(completed)
    }
}
