//! Account domain - model and DB queries for publishing accounts
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use sqlx::{Decode, Encode, Executor, Postgres, Type};
use std::str::FromStr;

/// Externally managed account status. Only `Active` accounts get work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "suspended" => Ok(AccountStatus::Suspended),
            "deleted" => Ok(AccountStatus::Deleted),
            other => Err(format!("unknown account status '{}'", other)),
        }
    }
}

impl Type<Postgres> for AccountStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for AccountStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(s.parse::<AccountStatus>()?)
    }
}

impl Encode<'_, Postgres> for AccountStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// Per-account voice rules passed to the generator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branding {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub call_to_action: Option<String>,
    #[serde(default = "default_threads_enabled")]
    pub threads_enabled: bool,
}

fn default_threads_enabled() -> bool {
    true
}

/// A publishing account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub display_name: String,
    pub handle: String,
    pub status: AccountStatus,
    /// Eligible persona keys, in preference order. Empty means all personas.
    pub personas: Vec<String>,
    pub branding: Json<Branding>,
    pub min_pipeline_depth: Option<i32>,
    pub max_pipeline_depth: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn branding(&self) -> &Branding {
        &self.branding.0
    }
}

/// Stored OAuth tokens for an account
#[derive(Debug, sqlx::FromRow)]
pub struct AccountTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
}

const ACCOUNT_COLUMNS: &str = "id, display_name, handle, status, personas, \
     COALESCE(branding, '{}'::jsonb) AS branding, \
     min_pipeline_depth, max_pipeline_depth, created_at";

/// List accounts eligible for pipeline work
pub async fn list_active_accounts<'e, E>(executor: E) -> Result<Vec<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM accounts WHERE status = 'active' ORDER BY id ASC",
        ACCOUNT_COLUMNS
    );
    sqlx::query_as(&query).fetch_all(executor).await
}

/// Get an account by ID
pub async fn get_account<'e, E>(executor: E, account_id: i64) -> Result<Option<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
    sqlx::query_as(&query)
        .bind(account_id)
        .fetch_optional(executor)
        .await
}

/// Get stored tokens for an account
pub async fn get_account_tokens<'e, E>(
    executor: E,
    account_id: i64,
) -> Result<Option<AccountTokens>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT access_token, refresh_token, token_expires_at
        FROM account_credentials WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(executor)
    .await
}

/// Replace tokens after a refresh
pub async fn update_account_tokens<'e, E>(
    executor: E,
    account_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE account_credentials SET
            access_token = $2,
            refresh_token = COALESCE($3, refresh_token),
            token_expires_at = $4,
            updated_at = NOW()
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branding_defaults_allow_threads() {
        let branding: Branding = serde_json::from_str(r#"{"tone":"dry"}"#).unwrap();
        assert!(branding.threads_enabled);
        assert_eq!(branding.tone.as_deref(), Some("dry"));
    }

    #[test]
    fn account_status_parse() {
        assert_eq!("suspended".parse::<AccountStatus>(), Ok(AccountStatus::Suspended));
        assert!("banned".parse::<AccountStatus>().is_err());
    }
}
