use std::sync::Arc;

mod app;
mod auth;
mod clock;
mod config;
mod db;
mod envelope;
mod error;
mod extract;
mod state;
#[cfg(test)]
mod testing;
mod users;

use crate::auth::sweeper::spawn_expired_token_sweeper;
use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "bookshelf=debug,axum=info,tower_http=info".to_string());
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

    let config = Arc::new(AppConfig::from_env()?);
    let pool = db::connect(&config.database).await?;
    db::migrate(&pool).await?;

    let state = AppState::postgres(config.clone(), pool);

    if let Some(secs) = config.tokens.sweep_interval_secs {
        spawn_expired_token_sweeper(state.tokens.clone(), std::time::Duration::from_secs(secs));
    }

    app::serve(app::build_app(state), &config).await
}
