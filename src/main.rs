use anyhow::{Context, Result};
use schooljoin::{config::Config, fetch::SheetsClient, server, service::DataService};
use std::{env, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) configuration ────────────────────────────────────────────
    let config = Config::from_env().context("reading configuration")?;
    if config.sheets.spreadsheet_id.is_none() {
        tracing::warn!("SPREADSHEET_ID is not set; dataset routes will return 500");
    }
    info!(
        mode = ?config.mode,
        ttl = ?config.cache_ttl,
        snapshot = %config.snapshot_path.display(),
        "startup"
    );

    // ─── 3) upstream + service ───────────────────────────────────────
    let source = SheetsClient::new(&config.sheets).context("building sheets client")?;
    let service = Arc::new(DataService::new(Arc::new(source), &config));
    service.initialize().await;

    // ─── 4) serve ────────────────────────────────────────────────────
    let routes = server::routes(service, config.admin_token.clone());
    info!("Server starting on port {}", config.port);
    info!("Health check: http://localhost:{}/health", config.port);
    warp::serve(routes).run(([0, 0, 0, 0], config.port)).await;

    Ok(())
}
