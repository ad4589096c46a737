use std::sync::Arc;
use std::time::Duration;

use relayget_core::fs_paths::{AppPaths, DesktopPaths};
use relayget_core::models::settings::{AppSettings, Environment};
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod core;
pub mod models;
pub mod platforms;
pub mod storage;

const REAPER_INTERVAL: Duration = Duration::from_secs(30);

pub struct AppState {
    pub orchestrator: core::orchestrator::Orchestrator,
    pub hub: Arc<core::progress::ProgressHub>,
    pub environment: Environment,
    pub settings: Arc<AppSettings>,
}

fn init_tracing(settings: &AppSettings) {
    let default_level = if settings.logging.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn build_state(settings: AppSettings, paths: &dyn AppPaths) -> anyhow::Result<Arc<AppState>> {
    let environment = storage::config::detect_environment(&settings, |k| std::env::var(k).ok());
    let hub = Arc::new(core::progress::ProgressHub::new(&settings.progress));
    let extractor = Arc::new(platforms::generic_ytdlp::YtdlpExtractor::new(
        paths.bin_dir(),
        settings.proxy.clone(),
    ));
    let orchestrator = core::orchestrator::Orchestrator::from_settings(
        &settings,
        environment,
        extractor,
        hub.clone(),
        paths.work_dir(),
    )?;

    Ok(Arc::new(AppState {
        orchestrator,
        hub,
        environment,
        settings: Arc::new(settings),
    }))
}

pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let reaper_hub = state.hub.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAPER_INTERVAL);
        loop {
            tick.tick().await;
            reaper_hub.reap_expired();
        }
    });

    let addr = format!("{}:{}", state.settings.server.bind_address, state.settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "relayget listening on http://{} ({} mode, strategies: {})",
        addr,
        state.environment,
        state.orchestrator.catalog().names().join(" -> ")
    );

    let app = commands::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    let paths = DesktopPaths;
    let mut settings = storage::config::load_settings(&storage::config::settings_path(&paths));
    storage::config::apply_env_overrides(&mut settings, |k| std::env::var(k).ok());
    init_tracing(&settings);
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid settings: {}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let state = build_state(settings, &paths)?;
        serve(state).await
    })
}
