pub mod http_api;
pub mod server_security;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use http_api::AppState;
use lantern_discovery::{
    default_collectors, BackendClient, ConfigProvider, JsonFileOverrideStore, MemoryOverrideStore,
    OverrideStore, Reconciler, SourceRegistry, Supervisor, SystemConfig,
};
use log::info;
use server_security::{AuthToken, AUTH_TOKEN_ENV};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(about = "Self-hosted app discovery with an admin API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Address for the admin API
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub bind: String,

    /// Allow binding to non-loopback addresses (requires an auth token)
    #[arg(long)]
    pub public: bool,

    /// Bearer token for admin requests (falls back to LANTERN_AUTH_TOKEN)
    #[arg(long)]
    pub auth_token: Option<String>,

    /// JSON file for override persistence; in-memory when omitted
    #[arg(long)]
    pub overrides: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    serve(cli).await
}

pub fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    let mut config = match path {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => SystemConfig::default(),
    };
    config.apply_process_env();
    Ok(config)
}

async fn open_store(path: Option<&Path>) -> Result<Arc<dyn OverrideStore>> {
    Ok(match path {
        Some(path) => Arc::new(
            JsonFileOverrideStore::open(path)
                .await
                .with_context(|| format!("Failed to open override store: {}", path.display()))?,
        ),
        None => Arc::new(MemoryOverrideStore::new()),
    })
}

async fn serve(cli: Cli) -> Result<()> {
    let addrs = server_security::resolve_guarded_bind_addrs(&cli.bind, cli.public).await?;
    let auth_token_raw = cli
        .auth_token
        .clone()
        .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok());
    let auth_token = AuthToken::parse(auth_token_raw.as_deref())?;
    if cli.public && auth_token.is_none() {
        anyhow::bail!("--public requires an auth token: set --auth-token or export {AUTH_TOKEN_ENV}");
    }

    let config = load_config(cli.config.as_deref())?;
    let client = BackendClient::new(config.http_timeout()).context("Failed to build HTTP client")?;
    let registry = Arc::new(SourceRegistry::new());
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(ConfigProvider::new(config)),
        registry.clone(),
        default_collectors(client),
    ));
    let store = open_store(cli.overrides.as_deref()).await?;

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        reconciler: Reconciler::new(registry, store),
        auth_token,
    });
    let app = http_api::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    let base_url = format!("http://{}", listener.local_addr()?);

    let started = supervisor.init_from_config();
    if started.is_empty() {
        info!("No discovery sources enabled; use PUT /api/admin/discovery/<source> to enable one");
    }

    info!("Serving admin API: {base_url}/api/admin/discovered-apps");
    if state.auth_token.is_some() {
        info!("Auth enabled: add header 'Authorization: Bearer ${AUTH_TOKEN_ENV}'");
    }
    if cli.public {
        let addrs = addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        info!("Public bind enabled (--public). Resolved addresses: {addrs}");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down discovery loops");
    supervisor.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
