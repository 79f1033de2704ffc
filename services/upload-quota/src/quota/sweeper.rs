use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::service::UploadQuotaService;

/// Periodically expires abandoned reservations so their slots return to
/// the owner's daily quota.
pub fn start_reservation_sweeper(
    service: Arc<UploadQuotaService>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match service.expire_stale().await {
                Ok(count) if count > 0 => {
                    info!(expired = count, "expired abandoned upload reservations");
                }
                Ok(_) => {
                    debug!("no stale upload reservations");
                }
                Err(err) => {
                    error!(error = %err, "failed to expire stale reservations");
                }
            }
        }
    })
}
