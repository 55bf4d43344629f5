mod config;
mod engine;
mod evaluator;
mod executor;
mod judgment;
mod llm;
mod resume;
mod runner;
mod worker;


use anyhow::Context;
use assay_common::config::EngineConfig;
use config::LanguageConfigManager;
use engine::DockerEngine;
use evaluator::EvaluationContext;
use llm::HttpGenerativeClient;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Assay Worker booting...");

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    debug!(
        plagiarism_threshold = config.plagiarism_threshold,
        execution_timeout_seconds = config.execution_timeout_seconds,
        execution_pool_size = config.execution_pool_size,
        execution_score_weight = config.execution_score_weight,
        "Engine configuration"
    );

    let languages = LanguageConfigManager::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Make sure config/languages.json exists or set LANGUAGES_CONFIG");
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let engine = DockerEngine::new(languages, &config)?;
    engine.verify().await?;
    engine.warm_images().await;

    let llm = HttpGenerativeClient::new(config.llm.clone()).context("Failed to build generative client")?;
    info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        coding_model = %config.llm.coding_model,
        "Generative client ready"
    );

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = ::redis::Client::open(redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", redis_url);

    let ctx = EvaluationContext {
        engine: &engine,
        llm: &llm,
        config: &config,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received shutdown signal, finishing the current job before exiting");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    worker::worker_loop(&mut redis_conn, &ctx, shutdown_rx).await;

    info!("Worker shutdown complete");
    Ok(())
}
