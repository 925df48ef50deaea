use tracing::{error, info, instrument};

use chime_core::now_ms;

use crate::engine::AlarmEngine;
use crate::error::Result;
use crate::fire::{self, FireOutcome, FirePath};

/// What boot recovery did with the stored alarms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Future alarms re-armed on both paths.
    pub rearmed: usize,
    /// Expired alarms delivered late, exactly once.
    pub delivered_late: usize,
    /// Expired alarms whose delivery was already claimed; record dropped.
    pub already_handled: usize,
    /// Alarms that could not be resolved; left stored for the next boot.
    pub failed: usize,
}

/// Walk the pending store and rebuild timer state after a process start.
///
/// Expired alarms run the normal fire sequence once, late; the delivery flag
/// still suppresses anything claimed before the restart. Future alarms are
/// re-armed under their stored epoch. The flag store is never cleared here,
/// so recovery cannot resurrect a delivery that already happened.
#[instrument(skip(engine))]
pub(crate) async fn run(engine: &AlarmEngine) -> Result<RecoveryReport> {
    let alarms = engine.inner.pending.get_all()?;
    let now = now_ms();
    let mut report = RecoveryReport::default();

    info!(stored = alarms.len(), "boot recovery started");
    for alarm in alarms {
        if alarm.is_expired(now) {
            match fire::run(&engine.inner, &alarm, FirePath::Recovery).await {
                Ok(FireOutcome::Delivered) => {
                    report.delivered_late += 1;
                    info!(
                        order_id = alarm.order_id.0,
                        target = %alarm.target_utc(),
                        "missed alarm delivered late"
                    );
                }
                Ok(FireOutcome::AlreadyDelivered) => {
                    // Delivered before the restart but the record survived a
                    // crash mid-sequence; the fire sequence dropped it.
                    report.already_handled += 1;
                }
                Ok(FireOutcome::Cancelled) | Ok(FireOutcome::Superseded) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        order_id = alarm.order_id.0,
                        error = %e,
                        "recovery fire failed; alarm stays stored"
                    );
                }
            }
        } else {
            engine.arm(&alarm);
            report.rearmed += 1;
        }
    }

    info!(
        rearmed = report.rearmed,
        delivered_late = report.delivered_late,
        already_handled = report.already_handled,
        failed = report.failed,
        "boot recovery finished"
    );
    Ok(report)
}
