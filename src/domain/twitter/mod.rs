//! Twitter domain - models and queries for posts and threads

pub mod models;
pub mod queries;

// Re-export models for convenience
pub use models::*;

// Re-export query modules
pub use queries::{posts, threads};
