//! Background security monitor
//!
//! Fixed-interval task that recomputes last-hour metrics for proactive
//! anomaly logging and prunes events past retention. Advisory and
//! idempotent: running it twice, or not at all, does not corrupt state.

use crate::{SecurityEventStore, Severity};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_monitor(events: Arc<SecurityEventStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_once(&events).await;
        }
    })
}

async fn run_once(events: &SecurityEventStore) {
    let end = Utc::now();
    let start = end - chrono::Duration::hours(1);

    match events.metrics(start, end).await {
        Ok(metrics) => {
            let critical = metrics
                .by_severity
                .get(Severity::Critical.as_str())
                .copied()
                .unwrap_or(0);
            if critical > 0 {
                tracing::warn!(
                    critical,
                    total = metrics.total_events,
                    "critical security events in the last hour"
                );
            } else {
                tracing::debug!(total = metrics.total_events, "hourly security scan clean");
            }
        }
        Err(e) => tracing::warn!("security monitor metrics pass failed: {e}"),
    }

    match events.prune_expired().await {
        Ok(0) => {}
        Ok(pruned) => tracing::info!(pruned, "pruned security events past retention"),
        Err(e) => tracing::warn!("security event prune failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventFilter, EventKind, NewEvent};
    use guard_store::MemoryStore;

    #[tokio::test]
    async fn run_once_is_safe_on_live_data() {
        let events = Arc::new(SecurityEventStore::new(
            Arc::new(MemoryStore::new()),
            None,
            crate::DEFAULT_RETENTION,
        ));
        events
            .record(NewEvent::new(EventKind::SuspiciousActivity, Severity::Critical))
            .await
            .unwrap();

        run_once(&events).await;
        run_once(&events).await;

        let page = events.query(&EventFilter::default()).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
