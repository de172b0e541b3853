use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::db::store::Store;

/// Removes every user's lapsed grants once per `every` until shutdown is
/// broadcast. The first sweep runs immediately.
pub fn spawn_expiry_sweeper(
    store: Arc<dyn Store>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(store.as_ref()).await,
                _ = shutdown.recv() => {
                    info!("Expiry sweeper stopped");
                    break;
                }
            }
        }
    })
}

async fn sweep_once(store: &dyn Store) {
    match store.prune_all_expired_grants(Utc::now()).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Expired grants swept"),
        Err(e) => error!("Expiry sweep failed: {e}"),
    }
}
