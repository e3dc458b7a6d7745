//! Configuration for the telewatch service.
//!
//! TOML file + `TELEWATCH_` environment layering, signing-secret resolution
//! (env var, then plaintext), and translation to
//! `telewatch_core::PipelineConfig`. Core never reads files; the binary
//! goes through this crate.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use telewatch_core::{BroadcastPolicy, PipelineConfig, RuleScoping};

/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "TELEWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
    /// Address the HTTP/WebSocket listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Allowed browser origin. Unset allows any origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cors_origin: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineSection {
    /// Seconds to wait before re-subscribing to reading inserts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// `"rooms"` or `"global"`.
    #[serde(default)]
    pub broadcast: BroadcastPolicy,

    /// `"gateway"` or `"gateway-and-owner"`.
    #[serde(default)]
    pub rule_scoping: RuleScoping,

    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,

    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,

    #[serde(default = "default_notifier_buffer")]
    pub notifier_buffer: usize,

    #[serde(default = "default_true")]
    pub gateway_snapshot: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            broadcast: BroadcastPolicy::default(),
            rule_scoping: RuleScoping::default(),
            backlog_limit: default_backlog_limit(),
            session_buffer: default_session_buffer(),
            notifier_buffer: default_notifier_buffer(),
            gateway_snapshot: true,
        }
    }
}

fn default_retry_delay_secs() -> u64 {
    5
}
fn default_backlog_limit() -> usize {
    20
}
fn default_session_buffer() -> usize {
    256
}
fn default_notifier_buffer() -> usize {
    1024
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthSection {
    /// Environment variable holding the token-signing secret.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: Option<String>,

    /// Token-signing secret (plaintext, prefer the env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
            jwt_secret: None,
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_jwt_secret_env() -> Option<String> {
    Some("JWT_SECRET".into())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSection {
    /// Filter directive used when `RUST_LOG` is unset and no `-v` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default)]
    pub format: LogFormat,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "telewatch", "telewatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("telewatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layer defaults, the TOML file at `path` (or the default path) and
/// `TELEWATCH_*` environment variables. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        for (field, value) in [
            ("pipeline.retry_delay_secs", p.retry_delay_secs),
            ("pipeline.backlog_limit", usize_to_u64(p.backlog_limit)),
            ("pipeline.session_buffer", usize_to_u64(p.session_buffer)),
            ("pipeline.notifier_buffer", usize_to_u64(p.notifier_buffer)),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Translate the `[pipeline]` section into core runtime configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            retry_delay: Duration::from_secs(p.retry_delay_secs),
            broadcast: p.broadcast,
            rule_scoping: p.rule_scoping,
            backlog_limit: p.backlog_limit,
            session_buffer: p.session_buffer,
            notifier_buffer: p.notifier_buffer,
            gateway_snapshot: p.gateway_snapshot,
        }
    }
}

fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn save_config(cfg: &Config, path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve the token-signing secret: `jwt_secret_env` lookup, then the
/// plaintext value. `None` disables owner-room subscriptions.
pub fn resolve_jwt_secret(auth: &AuthSection) -> Option<SecretString> {
    // 1. Named env var
    if let Some(ref env_name) = auth.jwt_secret_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.is_empty() {
                return Some(SecretString::from(val));
            }
        }
    }

    // 2. Plaintext in config
    auth.jwt_secret
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.clone()))
}
