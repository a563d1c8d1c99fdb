//! Error taxonomy for the content pipeline.
//!
//! Each layer owns its error enum. [`ConfigError`] is fatal and surfaces at
//! construction time; everything else is recoverable at the unit or item
//! level and ends up in the run summary.

use thiserror::Error;

/// Fatal configuration problems. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slot table is empty")]
    EmptySlotTable,

    #[error("no eligible posting weekdays configured")]
    NoEligibleWeekdays,

    #[error("invalid slot {hour:02}:{minute:02}")]
    InvalidSlot { hour: u32, minute: u32 },

    #[error("persona '{0}' has no topics")]
    PersonaWithoutTopics(String),

    #[error("persona catalog is empty")]
    EmptyCatalog,

    #[error("account {account_id} has no usable personas")]
    NoEligiblePersonas { account_id: i64 },

    #[error("invalid pipeline limits: {0}")]
    PipelineLimits(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to load persona catalog: {0}")]
    Catalog(String),
}

/// Content generator failures: skip the unit, continue the batch.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generator timed out after {0}s")]
    Timeout(u64),

    #[error("generator returned malformed output: {0}")]
    Malformed(String),

    #[error("generator HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generator API error: {0}")]
    Api(String),
}

/// Thread decomposition failures; fatal for the generated unit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecomposeError {
    #[error("content produced {count} segments (max {max})")]
    TooManySegments { count: usize, max: usize },

    #[error("word of {len} characters exceeds the segment budget of {budget}")]
    UnbreakableWord { len: usize, budget: usize },

    #[error("post of {len} characters exceeds the limit of {max}")]
    TooLong { len: usize, max: usize },

    #[error("content is empty")]
    Empty,
}

/// Publisher failures: the item is marked failed, the batch continues.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// Credential vault failures; surfaced to the executor as a publish error.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials stored for account {0}")]
    Missing(i64),

    #[error("token expired for account {0} and no refresh token is stored")]
    NoRefreshToken(i64),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CredentialError> for PublishError {
    fn from(e: CredentialError) -> Self {
        PublishError::Credentials(e.to_string())
    }
}

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid {entity} record {id}: {reason}")]
    InvalidRecord {
        entity: &'static str,
        id: i64,
        reason: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

/// Errors surfaced by a whole orchestrator run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("an orchestrator run is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures starting the cron trigger.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Schedule { expr: String, reason: String },

    #[error("job storage setup failed: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("job monitor failed: {0}")]
    Monitor(String),
}

/// Convenience alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
