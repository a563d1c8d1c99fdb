//! X/Twitter v2 adapter: token refresh and post creation.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::credentials::CredentialVault;
use super::publisher::{PublishRequest, Published, Publisher};
use crate::error::PublishError;

const API_BASE: &str = "https://api.x.com/2";

#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Twitter API error ({status}): {body}")]
    Api { status: StatusCode, body: String },
}

impl From<TwitterError> for PublishError {
    fn from(e: TwitterError) -> Self {
        match e {
            TwitterError::Http(e) => PublishError::Http(e),
            TwitterError::Api { status, body } if status == StatusCode::TOO_MANY_REQUESTS => {
                PublishError::RateLimited(body)
            }
            TwitterError::Api { status, body } if status == StatusCode::UNAUTHORIZED => {
                PublishError::Credentials(body)
            }
            TwitterError::Api { status, body } => PublishError::Api(format!("{}: {}", status, body)),
        }
    }
}

#[derive(Clone)]
pub struct TwitterClient {
    client_id: String,
    client_secret: String,
    api_base: String,
    http: Client,
}

impl TwitterClient {
    pub fn new(client_id: &str, client_secret: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            api_base: API_BASE.to_string(),
            http: Client::builder().timeout(request_timeout).build()?,
        })
    }

    /// Point the client at a different API host
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Build Basic auth header for OAuth token requests
    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, TwitterError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await?;
        Err(TwitterError::Api { status, body })
    }

    /// Refresh an access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, TwitterError> {
        let url = format!("{}/oauth2/token", self.api_base);

        let params = [
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(url)
            .header("Authorization", self.basic_auth_header())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&params)
            .send()
            .await?;

        let token: TokenResponse = Self::check(resp).await?.json().await?;
        Ok(token)
    }

    /// Post a tweet, optionally as a reply to `in_reply_to`.
    pub async fn post_tweet(
        &self,
        access_token: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<TweetResponse, TwitterError> {
        let url = format!("{}/tweets", self.api_base);

        let mut body = serde_json::json!({ "text": text });

        if let Some(parent_id) = in_reply_to {
            body["reply"] = serde_json::json!({
                "in_reply_to_tweet_id": parent_id
            });
        }

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let wrapper: TweetResponseWrapper = Self::check(resp).await?.json().await?;
        Ok(wrapper.data)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct TweetResponseWrapper {
    data: TweetResponse,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TweetResponse {
    pub id: String,
    pub text: String,
}

pub fn status_url(id: &str) -> String {
    format!("https://x.com/i/web/status/{}", id)
}

/// [`Publisher`] backed by the X API and a [`CredentialVault`]
pub struct TwitterPublisher {
    client: TwitterClient,
    vault: Arc<dyn CredentialVault>,
}

impl TwitterPublisher {
    pub fn new(client: TwitterClient, vault: Arc<dyn CredentialVault>) -> Self {
        Self { client, vault }
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<Published, PublishError> {
        let account_id = request
            .account_id
            .ok_or_else(|| PublishError::Credentials("post has no owning account".into()))?;

        let token = self.vault.access_token(account_id).await?;
        let tweet = self
            .client
            .post_tweet(&token, &request.text, request.reply_to.as_deref())
            .await?;

        tracing::debug!(account_id, tweet_id = %tweet.id, "Tweet posted");
        Ok(Published {
            url: Some(status_url(&tweet.id)),
            id: tweet.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_auth_errors_are_classified() {
        let limited: PublishError = TwitterError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "slow down".into(),
        }
        .into();
        assert!(matches!(limited, PublishError::RateLimited(_)));

        let unauthorized: PublishError = TwitterError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: "bad token".into(),
        }
        .into();
        assert!(matches!(unauthorized, PublishError::Credentials(_)));

        let other: PublishError = TwitterError::Api {
            status: StatusCode::BAD_REQUEST,
            body: "duplicate content".into(),
        }
        .into();
        assert!(matches!(other, PublishError::Api(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn token_response_tolerates_missing_scope() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","token_type":"bearer","expires_in":7200}"#,
        )
        .unwrap();
        assert!(token.refresh_token.is_none());
        assert_eq!(token.expires_in, 7200);
    }
}
