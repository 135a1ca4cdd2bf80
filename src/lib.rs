// Chat Relay - authenticating streaming proxy for chat-completion APIs

pub mod api;
pub mod auth;
pub mod config;
pub mod proxy;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{AppConfig, ConfigError};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
