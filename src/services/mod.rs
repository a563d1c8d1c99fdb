pub mod credentials;
pub mod error;
pub mod generator;
pub mod publisher;
pub mod twitter;

pub use credentials::{CredentialVault, PgCredentialVault};
pub use generator::{ContentGenerator, GeneratedContent, GenerationRequest, HttpGenerator};
pub use publisher::{PartialPublish, PublishRequest, Published, Publisher};
pub use twitter::{TwitterClient, TwitterPublisher};
