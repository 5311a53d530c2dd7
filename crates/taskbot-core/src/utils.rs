use std::{future::Future, time::Duration};

use chrono::Utc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Text Helpers ==============

/// Keep the first `max_chars` characters, appending `...` when anything was cut.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

// ============== Repeating Tasks ==============

/// Handle to a repeating task started with [`start_interval_loop`].
///
/// Cancelling never interrupts a tick that is already running; the tick sees the cancelled
/// token and the loop exits before the next one.
pub struct IntervalController {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl IntervalController {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the in-flight tick (if any) to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Start a cancellable background loop that runs `tick` every `interval`, first tick immediately.
///
/// Ticks never overlap: a slow tick delays the next one instead of stacking up.
pub fn start_interval_loop<F, Fut>(interval: Duration, mut tick: F) -> IntervalController
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = interval.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
              _ = token.cancelled() => break,
              _ = ticker.tick() => tick(token.clone()).await,
            }
        }
    });

    IntervalController { cancel, handle }
}
