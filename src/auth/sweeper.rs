use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::store::TokenStore;

/// Periodically deletes rows whose expiry has passed. Validation never relies
/// on this; it only keeps the table small.
pub fn spawn_expired_token_sweeper(store: TokenStore, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "expired token sweeper started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => debug!("no expired tokens to sweep"),
                Ok(removed) => info!(removed, "expired tokens swept"),
                Err(e) => error!(error = %e, "expired token sweep failed"),
            }
        }
    })
}
