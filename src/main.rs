use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use autopost::AppState;
use autopost::config::AppConfig;
use autopost::engine::decomposer::ThreadDecomposer;
use autopost::engine::pipeline::PipelineManager;
use autopost::engine::rotator::PersonaRotator;
use autopost::engine::{
    Components, Orchestrator, OrchestratorRunner, PostingExecutor, TriggerMode, run_cron_worker,
};
use autopost::routes;
use autopost::services::{
    ContentGenerator, CredentialVault, HttpGenerator, PgCredentialVault, Publisher, TwitterClient,
    TwitterPublisher,
};
use autopost::store::{PgStore, TweetStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,autopost=debug")),
        )
        .init();

    let config = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn TweetStore> = Arc::new(PgStore::new(pool.clone()));

    // Twitter OAuth 2.0 client shared by the vault (refresh) and the publisher
    let mut twitter = TwitterClient::new(
        &config.twitter_client_id,
        &config.twitter_client_secret,
        Duration::from_secs(config.publish_timeout_secs.max(1)),
    )
    .context("Failed to build Twitter client")?;
    if let Some(base) = &config.twitter_api_base {
        twitter = twitter.with_api_base(base);
    }
    let vault: Arc<dyn CredentialVault> = Arc::new(PgCredentialVault::new(pool.clone(), twitter.clone()));
    let publisher: Arc<dyn Publisher> =
        Arc::new(TwitterPublisher::new(twitter, vault));

    let generator: Arc<dyn ContentGenerator> = Arc::new(
        HttpGenerator::new(
            &config.generator_url,
            config.generator_api_key.clone(),
            Duration::from_secs(config.generation_timeout_secs.max(1)),
        )
        .context("Failed to build generator client")?,
    );

    let catalog = Arc::new(config.catalog()?);
    info!(personas = catalog.len(), "Persona catalog loaded");

    let components = Components {
        rotator: PersonaRotator::new(catalog, config.rotation_policy, config.thread_probability),
        gate: config.quality_gate(),
        decomposer: ThreadDecomposer::default(),
        pipeline: PipelineManager::new(config.pipeline)?,
        scheduler: config.scheduler()?,
    };
    let executor = PostingExecutor::new(store.clone(), publisher, config.executor());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        generator,
        executor,
        components,
        config.policy(),
    ));

    let runner = OrchestratorRunner::new(orchestrator.clone());
    let cron_task = match config.trigger_mode {
        TriggerMode::Timer => {
            runner.start();
            None
        }
        TriggerMode::Cron => {
            let orchestrator = orchestrator.clone();
            let pool = pool.clone();
            let expr = config.cron.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_cron_worker(orchestrator, pool, &expr).await {
                    error!(error = %e, "Orchestrator cron worker stopped");
                }
            }))
        }
        TriggerMode::Manual => {
            info!("Manual trigger mode, runs only via POST /orchestrator/run");
            None
        }
    };

    let state = Arc::new(AppState {
        store,
        orchestrator,
    });
    let app = routes::build_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, trigger = config.trigger_mode.as_str(), "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    runner.stop().await;
    if let Some(task) = cron_task {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
