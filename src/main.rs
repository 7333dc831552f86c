use clap::Parser;
use mongowire::dispatcher::DispatcherBuilder;
use mongowire::{config::Config, server};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so clap's env fallbacks see variables
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Attempt to load config before initializing logs to pick up log_level from file
    let cfg_file_res = Config::load_from_file(cli.config.as_deref());
    let cfg_file = match &cfg_file_res {
        Ok(c) => c.clone(),
        Err(_) => Config::default(),
    };

    // Determine log filter precedence: CLI (--log-level / MONGOWIRE_LOG_LEVEL)
    // > RUST_LOG (env) > config.toml log_level > default("info")
    let filter_spec = if let Some(ref lvl) = cli.log_level {
        lvl.clone()
    } else if let Ok(env_spec) = std::env::var("RUST_LOG") {
        env_spec
    } else if let Some(ref lvl) = cfg_file.log_level {
        lvl.clone()
    } else {
        "info".to_string()
    };

    // Initialize logging with chosen filter
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_spec))
        .compact()
        .init();

    if let Err(e) = cfg_file_res.as_ref() {
        tracing::warn!(error = %format!("{e:?}"), "invalid config; using defaults");
    }

    // Load from config file (if present), then override with CLI/env.
    let cfg = cfg_file.with_overrides(cli.listen_addr.clone(), cli.log_level.clone());
    cfg.validate()?;
    tracing::info!(listen_addr = %cfg.listen_addr, "starting mongowire");

    // No business handlers ship with this façade (spec §1 Non-goals); the
    // hosting application registers its own via DispatcherBuilder::register
    // before the server starts accepting connections.
    let dispatcher = Arc::new(DispatcherBuilder::new().build());
    let shutdown = CancellationToken::new();

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c; shutting down");
        ctrl_c_shutdown.cancel();
    });

    if let Err(e) = server::run(cfg, dispatcher, shutdown).await {
        tracing::error!(error = %format!("{e:?}"), "server terminated with error");
    }

    Ok(())
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mongowire",
    version,
    about = "Server-side MongoDB wire protocol façade"
)]
struct Cli {
    /// Path to config TOML file
    #[arg(short = 'c', long = "config", env = "MONGOWIRE_CONFIG")]
    config: Option<String>,

    /// Listen address for the server (e.g., 127.0.0.1:27017)
    #[arg(long = "listen-addr", env = "MONGOWIRE_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Log level or filter spec (e.g., info or info,mongowire=debug)
    #[arg(long = "log-level", env = "MONGOWIRE_LOG_LEVEL")]
    log_level: Option<String>,
}
