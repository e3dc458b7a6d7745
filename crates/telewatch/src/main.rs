mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use telewatch::{AppState, ServerError, create_router};
use telewatch_config::{Config, LogFormat, LogSection};
use telewatch_core::{DisabledVerifier, JwtVerifier, MemoryStore, Pipeline, Stores, TokenVerifier};

use crate::cli::{Cli, Command, InitConfigArgs, ServeArgs};

/// Filter used when neither `RUST_LOG`, `-v` nor `log.level` is set.
const DEFAULT_FILTER: &str = "warn,telewatch=info,telewatch_core=info";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, log: &LogSection) {
    let fallback = match verbosity {
        0 => log.level.as_deref().unwrap_or(DEFAULT_FILTER),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match log.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let config_path = cli.config.clone().unwrap_or_else(telewatch_config::config_path);

    match cli.command {
        // Writing the defaults must work even when the existing file is broken.
        Command::InitConfig(args) => init_config(&config_path, &args),
        Command::Serve(args) => {
            let cfg = telewatch_config::load_config(Some(&config_path))?;
            init_tracing(cli.verbose, &cfg.log);
            serve(cfg, args).await
        }
    }
}

// ── serve ────────────────────────────────────────────────────────────

async fn serve(cfg: Config, args: ServeArgs) -> Result<(), ServerError> {
    let listen = args.listen.unwrap_or(cfg.server.listen);

    let verifier: Arc<dyn TokenVerifier> = match telewatch_config::resolve_jwt_secret(&cfg.auth) {
        Some(secret) => Arc::new(JwtVerifier::new(&secret)),
        None => {
            warn!("no token-signing secret configured, owner rooms are disabled");
            Arc::new(DisabledVerifier)
        }
    };

    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(cfg.pipeline_config(), Stores::memory(&store), verifier);
    pipeline.start().await?;

    let app = create_router(
        AppState::new(pipeline.clone()),
        cfg.server.cors_origin.as_deref(),
    );
    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(source) => {
            pipeline.shutdown().await;
            return Err(ServerError::Bind {
                addr: listen,
                source,
            });
        }
    };
    info!(%listen, "telewatch listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    pipeline.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}

// ── init-config ──────────────────────────────────────────────────────

fn init_config(path: &std::path::Path, args: &InitConfigArgs) -> Result<(), ServerError> {
    telewatch_config::save_config(&Config::default(), path, args.force)?;
    eprintln!("Wrote default configuration to {}", path.display());
    Ok(())
}
