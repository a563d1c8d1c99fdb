//! Autonomous content pipeline and posting scheduler.

pub mod config;
pub mod constants;
pub mod domain;
pub mod engine;
pub mod error;
pub mod routes;
pub mod services;
pub mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use engine::Orchestrator;
use store::TweetStore;

/// Shared state for route handlers
pub struct AppState {
    pub store: Arc<dyn TweetStore>,
    pub orchestrator: Arc<Orchestrator>,
}
