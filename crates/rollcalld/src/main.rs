use anyhow::{Context, Result};
use rollcall_core::{SystemClock, DESCRIPTOR_LEN};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::Config;
use engine::EngineSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::from_env().context("failed to load configuration")?;
    let offset = config.utc_offset()?;

    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        min_samples = config.min_samples,
        utc_offset_minutes = config.utc_offset_minutes,
        "configuration loaded"
    );

    let conn = rollcall_store::open_db(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let engine = engine::spawn_engine(
        conn,
        Arc::new(SystemClock::new(offset)),
        EngineSettings {
            match_threshold: config.match_threshold,
            min_samples: config.min_samples,
            dimension: DESCRIPTOR_LEN,
        },
    )?;

    if !config.is_localhost() {
        tracing::warn!(
            host = %config.host,
            "binding on non-localhost address; endpoints may be remotely reachable"
        );
    }

    let app = http::router(engine, &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    tracing::info!(addr = %config.bind_addr(), "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
