use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, ErrorKind};

/// Background task that refreshes the snapshot every `every` and scans it for
/// same-room collisions. The first tick fires after one period; callers do
/// their own initial refresh. Returns once `shutdown` is cancelled.
pub async fn run_refresher(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match engine.refresh_guarded(&shutdown).await {
            Ok(Some(bookings)) => debug!(bookings = bookings.len(), "periodic refresh"),
            Ok(None) => break,
            // Nobody signed in yet; the session watcher refreshes on sign-in.
            Err(e) if e.kind() == ErrorKind::AuthRequired => debug!(error = %e, "periodic refresh skipped"),
            Err(e) => warn!(error = %e, "periodic refresh failed"),
        }

        let collisions = engine.collisions().await;
        if !collisions.is_empty() {
            warn!(count = collisions.len(), first = ?collisions.first(), "rooms double-booked on the provider");
        }
    }
    info!("refresher stopped");
}
