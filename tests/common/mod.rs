#![allow(dead_code)]

//! Shared fixtures: a mockito upstream and an app state pointed at it.

use std::time::Duration;

use chat_relay::api::{AppState, UpstreamClient};
use chat_relay::auth::Authenticator;
use chat_relay::proxy::ModelRegistry;

pub const PROXY_KEY: &str = "sk-proxy-test";
pub const UPSTREAM_KEY: &str = "sk-upstream-test";
pub const UPSTREAM_PATH: &str = "/v1/chat/completions";

pub fn state_for(upstream_base: &str) -> AppState {
    let upstream = UpstreamClient::new(
        format!("{upstream_base}{UPSTREAM_PATH}"),
        UPSTREAM_KEY,
        Duration::from_secs(5),
    )
    .expect("Failed to build upstream client");

    AppState::new(
        ModelRegistry::builtin(),
        Authenticator::new(PROXY_KEY).expect("Failed to build authenticator"),
        upstream,
    )
}

pub fn bearer() -> String {
    format!("Bearer {PROXY_KEY}")
}
