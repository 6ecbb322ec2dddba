use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use hearthgate_internal::config::Config;
use hearthgate_internal::endpoints;
use hearthgate_internal::observability::{setup_observability, LogFormat};
use hearthgate_internal::state::AppStateData;

#[derive(Parser, Debug)]
#[command(version, about = "Hearth admission gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Run with built-in defaults instead of a config file.
    #[arg(long, default_value_t = false)]
    default_config: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = setup_observability(args.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match &args.config_file {
        Some(path) => match Config::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{e}");
                std::process::exit(1);
            }
        },
        None => {
            if !args.default_config {
                tracing::warn!(
                    "No config file provided; starting with built-in defaults (pass \
                     `--default-config` to silence this warning)"
                );
            }
            Config::default()
        }
    };

    let bind_address = config.gateway.bind_address;
    let state = match AppStateData::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize gateway state: {e}");
            std::process::exit(1);
        }
    };

    let router = endpoints::router(state);

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {bind_address}");

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
