//! Per-account credential lookup with refresh-on-expiry

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use super::twitter::TwitterClient;
use crate::domain::accounts;
use crate::error::{CredentialError, StoreError};

#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// A currently valid access token for the account.
    async fn access_token(&self, account_id: i64) -> Result<String, CredentialError>;
}

/// Tokens in `account_credentials`, refreshed through the X OAuth endpoint
/// shortly before they expire.
pub struct PgCredentialVault {
    pool: PgPool,
    client: TwitterClient,
    refresh_margin: Duration,
}

impl PgCredentialVault {
    pub fn new(pool: PgPool, client: TwitterClient) -> Self {
        Self {
            pool,
            client,
            refresh_margin: Duration::seconds(60),
        }
    }
}

#[async_trait]
impl CredentialVault for PgCredentialVault {
    async fn access_token(&self, account_id: i64) -> Result<String, CredentialError> {
        let tokens = accounts::get_account_tokens(&self.pool, account_id)
            .await
            .map_err(StoreError::from)?
            .ok_or(CredentialError::Missing(account_id))?;

        // Token still valid
        if tokens.token_expires_at > Utc::now() + self.refresh_margin {
            return Ok(tokens.access_token);
        }

        // Need to refresh
        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            warn!(account_id, "Token expired and no refresh token stored");
            CredentialError::NoRefreshToken(account_id)
        })?;

        let new_tokens = self
            .client
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;

        let expires_at = Utc::now() + Duration::seconds(new_tokens.expires_in);
        accounts::update_account_tokens(
            &self.pool,
            account_id,
            &new_tokens.access_token,
            new_tokens.refresh_token.as_deref(),
            expires_at,
        )
        .await
        .map_err(StoreError::from)?;

        info!(account_id, %expires_at, "Refreshed access token");
        Ok(new_tokens.access_token)
    }
}
