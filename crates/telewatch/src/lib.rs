//! telewatch: live transport and process bootstrap for the telemetry alarm
//! pipeline. The WebSocket and HTTP surfaces live in [`server`]; the binary
//! entry point is `src/main.rs`.

pub mod error;
pub mod server;

pub use error::{ServerError, exit_code};
pub use server::{AppState, create_router};
