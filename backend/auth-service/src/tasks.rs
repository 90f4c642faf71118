/// Background maintenance tasks
use std::sync::Arc;
use std::time::Duration;
use token_blacklist::TokenBlacklist;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically sweep expired blacklist entries. Reads already ignore
/// expired records; this only bounds store growth.
pub fn spawn_blacklist_sweeper(
    blacklist: Arc<TokenBlacklist>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match blacklist.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "blacklist sweep complete"),
                Err(e) => tracing::warn!("blacklist sweep failed: {e}"),
            }
        }
    })
}
