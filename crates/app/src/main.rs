//! Parla - live speech translation rooms
//!
//! One speaker per room streams transcribed utterances; the server
//! translates each one into the configured target languages and fans it
//! out to every viewer.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parla_core::{Coordinator, DeepLTranslator, TranslationGateway};
use parla_net::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "parla", version, about = "Live translation room server")]
struct Args {
    /// Config file; defaults to parla.toml in the user config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind.
    #[arg(long)]
    bind: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let gateway = build_gateway(&config);
    let coordinator = Arc::new(Coordinator::new(config.coordinator_config(), gateway));

    log_banner(&config, &coordinator);

    let server = match Server::start(coordinator, config.server_options()).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(addr = %server.addr(), "Parla listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down");
    server.shutdown().await;
    // Give connection tasks a moment to flush the shutdown notice
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    ExitCode::SUCCESS
}

fn load_config(args: &Args) -> config::Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate()?;
    Ok(config)
}

fn build_gateway(config: &ServerConfig) -> TranslationGateway {
    let targets = config.target_languages.clone();
    let Some(key) = config.deepl_key() else {
        return TranslationGateway::unconfigured(targets);
    };

    match DeepLTranslator::new(key.to_string(), config.translation.api_url.clone()) {
        Ok(translator) => {
            tracing::info!(api_url = %translator.api_url(), "DeepL translator ready");
            TranslationGateway::new(Arc::new(translator), targets)
                .with_call_timeout(config.translation.call_timeout())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise DeepL client, translation disabled");
            TranslationGateway::unconfigured(targets)
        }
    }
}

fn log_banner(config: &ServerConfig, coordinator: &Coordinator) {
    let targets: Vec<_> = config
        .target_languages
        .iter()
        .map(|lang| lang.as_str())
        .collect();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        translation = if coordinator.gateway().is_configured() { "configured" } else { "NOT configured" },
        room_creation = if coordinator.authority().creation_enabled() { "enabled" } else { "disabled" },
        speaker_left_policy = ?config.speaker_left_policy,
        targets = %targets.join(","),
        "Starting Parla"
    );
    if !coordinator.gateway().is_configured() {
        tracing::warn!("DEEPL_AUTH_KEY not set, every translation will report an error");
    }
    if !coordinator.authority().creation_enabled() {
        tracing::warn!("ROOM_CREATION_ADMIN_SECRET not set, new rooms can only be pre-registered");
    }
}
