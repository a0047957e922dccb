//! Background service starters - aggregate throughput reporting.

use std::sync::atomic::Ordering;

use crate::types::Event;

use super::DownloadManager;

impl DownloadManager {
    /// Start the throughput reporter, if a reporting interval is configured
    ///
    /// Every interval the bytes fetched by all runners are drained and published as
    /// a `Speed` event. Idle intervals are skipped, except for the first one after
    /// activity so subscribers see the rate drop to zero.
    pub(crate) fn start_speed_reporter(&self) -> Option<tokio::task::JoinHandle<()>> {
        let Some(period) = self.config.download.speed_report_interval else {
            tracing::info!("No speed report interval configured, skipping speed reporter");
            return None;
        };

        let bytes_counter = self.bytes_counter.clone();
        let bus = self.bus.clone();
        let shutdown = self.queue_state.shutdown_token.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_rate = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let bytes = bytes_counter.swap(0, Ordering::Relaxed);
                        let bytes_per_sec = (bytes as f64 / period.as_secs_f64()) as u64;

                        if bytes_per_sec > 0 || last_rate > 0 {
                            bus.publish(Event::Speed { bytes_per_sec });
                        }
                        last_rate = bytes_per_sec;
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "Speed reporter started");
        Some(handle)
    }
}
