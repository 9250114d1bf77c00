use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::reply::StopStatus;
use crate::stop::{StopEvent, StopHandler};

/// Run the stop handler for `instance_id` on a fixed interval, first tick after one interval.
///
/// Replies are only logged. The loop keeps going after a stop, since a later start
/// brings the machine back under the same schedule.
pub async fn run_stop_schedule(handler: Arc<StopHandler>, instance_id: String, interval: Duration) {
    tracing::info!(
        %instance_id,
        "Auto-stop schedule every {} seconds",
        interval.as_secs()
    );
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let reply = handler
            .handle(StopEvent::for_instance(instance_id.clone()))
            .await;
        match reply.body.status {
            StopStatus::Error => tracing::error!(
                status_code = reply.status_code,
                "Scheduled stop check failed: {}",
                reply.body.message
            ),
            status => tracing::info!(?status, "Scheduled stop check: {}", reply.body.message),
        }
    }
}
