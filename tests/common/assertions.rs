//! Event collection helpers for integration tests

use std::time::Duration;

use comic_dl::{Event, Subscription};

/// Upper bound on any single wait (virtual time when the clock is paused)
pub const WAIT: Duration = Duration::from_secs(3600);

/// Collect events for `key` until `stop` matches one of them (inclusive)
pub async fn collect_events_until<F>(sub: &mut Subscription, key: &str, stop: F) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let result = tokio::time::timeout(WAIT, async {
        while let Some(event) = sub.recv().await {
            if !event.key().is_some_and(|k| k.as_str() == key) {
                continue;
            }
            let should_stop = stop(&event);
            collected.push(event);
            if should_stop {
                return;
            }
        }
    })
    .await;

    assert!(result.is_ok(), "timed out collecting events for {key}");
    collected
}

/// Collect events for `key` through its terminal event
pub async fn collect_lifecycle(sub: &mut Subscription, key: &str) -> Vec<Event> {
    collect_events_until(sub, key, Event::is_terminal).await
}

/// `(kind, completed, total)` for each event, for compact sequence assertions
pub fn progress_trace(events: &[Event]) -> Vec<(&'static str, u32, u32)> {
    events
        .iter()
        .map(|event| {
            let kind = match event {
                Event::Created { .. } => "created",
                Event::Updated { .. } => "updated",
                Event::Retrying { .. } => "retrying",
                Event::Paused { .. } => "paused",
                Event::Resumed { .. } => "resumed",
                Event::Succeeded { .. } => "succeeded",
                Event::Failed { .. } => "failed",
                Event::Removed { .. } => "removed",
                Event::Speed { .. } => "speed",
                Event::Gap { .. } => "gap",
                Event::Shutdown => "shutdown",
            };
            match event.snapshot() {
                Some(s) => (kind, s.completed_units, s.total_units),
                None => (kind, 0, 0),
            }
        })
        .collect()
}
