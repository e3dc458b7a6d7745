//! Process-level errors with miette diagnostics and stable exit codes.

use std::net::SocketAddr;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use telewatch_config::ConfigError;
use telewatch_core::CoreError;

/// Exit codes returned by the `telewatch` binary.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum ServerError {
    // ── Store ────────────────────────────────────────────────────────
    #[error("Could not open the reading change stream")]
    #[diagnostic(
        code(telewatch::store_unavailable),
        help(
            "The reading store must be reachable at startup.\n\
             Check the store and restart; the supervisor should retry."
        )
    )]
    StoreUnavailable {
        #[source]
        source: CoreError,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration")]
    #[diagnostic(
        code(telewatch::config_invalid),
        help("Generate a fresh config with: telewatch init-config --force")
    )]
    Config {
        #[source]
        source: ConfigError,
    },

    #[error("Config file already exists: {}", path.display())]
    #[diagnostic(
        code(telewatch::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: PathBuf },

    // ── Network ──────────────────────────────────────────────────────
    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(telewatch::bind_failed),
        help(
            "Another process may be using the port.\n\
             Change server.listen or set TELEWATCH_SERVER__LISTEN."
        )
    )]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(telewatch::core))]
    Core(CoreError),

    #[error("IO error: {0}")]
    #[diagnostic(code(telewatch::io))]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Map to the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StoreUnavailable { .. } | Self::Bind { .. } => exit_code::CONNECTION,
            Self::Config { .. } | Self::ConfigExists { .. } => exit_code::CONFIG,
            Self::Core(err) if err.is_transient() => exit_code::CONNECTION,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::AlreadyExists { path } => Self::ConfigExists { path },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config { source: other },
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StoreUnavailable { .. } => Self::StoreUnavailable { source: err },
            other => Self::Core(other),
        }
    }
}
