//! Content pipeline engine: scheduling, generation policy, posting.

pub mod decomposer;
pub mod executor;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod rotator;
pub mod runner;
pub mod scheduler;

pub use executor::{ExecutorConfig, PostingExecutor, ThreadMode};
pub use orchestrator::{Components, Orchestrator, OrchestratorPolicy, RunSummary, TriggerMode};
pub use runner::{OrchestratorRunner, run_cron_worker};
