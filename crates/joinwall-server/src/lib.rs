//! HTTP admin panel and operator CLI for joinwall.
//!
//! The router is thin glue over [`joinwall_store`] and [`joinwall_gate`]; all
//! state lives in [`AppState`].

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::PanelConfig;
pub use error::{ApiError, ConfigError};
pub use routes::{build_router, serve};
pub use state::AppState;
