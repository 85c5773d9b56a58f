//! Background live-playlist refresh.
//!
//! One cooperative task per tree: sleeps for the current update interval,
//! then re-prepares every enabled representation of the current period.
//! The sleep restarts when the foreground refreshes on its own
//! ([`crate::HlsTree::refresh_segments`]) and the task exits when the
//! tree's cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::tree::Shared;

/// Interval used until the first `EXT-X-TARGETDURATION` arrives.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) fn spawn(shared: Arc<Shared>) {
    tokio::spawn(async move {
        debug!("zither-hls: refresh task started");
        loop {
            let interval = {
                let state = shared.state.lock().await;
                shared
                    .options
                    .live_refresh_interval
                    .or(state.update_interval)
                    .unwrap_or(DEFAULT_UPDATE_INTERVAL)
            };

            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                // Foreground refresh: restart the sleep.
                _ = shared.timer_reset.notified() => continue,
                _ = tokio::time::sleep(interval) => {}
            }

            shared.refresh_live_segments().await;
        }
        debug!("zither-hls: refresh task stopped");
    });
}
