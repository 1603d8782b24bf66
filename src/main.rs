mod app;
mod config;
mod contacts;
mod db;
mod error;
mod security;
mod server;
mod state;
mod tls;

use anyhow::Context;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "contacts_api=debug,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;
    tracing::info!(
        http_port = config.http_port,
        https_port = config.https_port,
        environment = ?config.environment,
        cors_origin = %config.cors_origin,
        "configuration loaded"
    );

    server::run(config).await.context("server")?;
    Ok(())
}
