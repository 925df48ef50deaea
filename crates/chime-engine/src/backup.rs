use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use chime_core::Alarm;

use crate::arm::delay_until;
use crate::engine::Inner;
use crate::fire::{self, FireOutcome, FirePath};

/// First retry delay after a failed fire attempt.
const RETRY_BASE: Duration = Duration::from_secs(5);
/// Retry delays double up to this cap.
const RETRY_CAP: Duration = Duration::from_secs(60);
/// Fire attempts before the alarm is left to boot recovery.
const MAX_ATTEMPTS: u32 = 5;

/// Margin-delayed timer task: sleeps until `target + margin`, then drives the
/// fire sequence, retrying storage failures with doubling backoff.
///
/// This path never assumes the exact path ran; it re-checks the delivery flag
/// itself, so a silently denied primary still ends in delivery. Any terminal
/// outcome stops the retries, including a claim already won elsewhere.
pub(crate) async fn run(inner: Arc<Inner>, alarm: Alarm, margin: Duration) {
    let wake_ms = alarm.target_ms.saturating_add(margin.as_millis() as i64);
    tokio::time::sleep(delay_until(wake_ms)).await;
    debug!(order_id = alarm.order_id.0, "backup margin elapsed");

    let mut delay = RETRY_BASE;
    for attempt in 1..=MAX_ATTEMPTS {
        match fire::run(&inner, &alarm, FirePath::Backup).await {
            Ok(FireOutcome::Delivered) => {
                debug!(order_id = alarm.order_id.0, "backup path delivered");
                return;
            }
            Ok(outcome) => {
                inner.registry.settle(alarm.order_id, alarm.epoch);
                debug!(order_id = alarm.order_id.0, ?outcome, "backup path stood down");
                return;
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    order_id = alarm.order_id.0,
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "backup fire attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay);
            }
            Err(e) => {
                inner.registry.settle(alarm.order_id, alarm.epoch);
                error!(
                    order_id = alarm.order_id.0,
                    error = %e,
                    "backup path exhausted retries; alarm stays stored for recovery"
                );
            }
        }
    }
}

/// Next backoff delay: double, capped at [`RETRY_CAP`].
fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(RETRY_CAP)
}
