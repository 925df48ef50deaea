use std::fmt;

use tracing::{debug, info, warn};

use chime_core::Alarm;

use crate::engine::Inner;
use crate::error::Result;

/// Which caller is driving a fire attempt. Shows up in logs and selects the
/// sibling to abort on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FirePath {
    /// Exact wall-clock timer at the target instant.
    Primary,
    /// Margin-delayed timer at target plus margin.
    Backup,
    /// Boot recovery replaying an expired alarm.
    Recovery,
}

impl fmt::Display for FirePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirePath::Primary => write!(f, "primary"),
            FirePath::Backup => write!(f, "backup"),
            FirePath::Recovery => write!(f, "recovery"),
        }
    }
}

/// Terminal result of one fire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FireOutcome {
    /// This call won the flag and invoked the sink.
    Delivered,
    /// Another path (or a pre-restart run) already delivered this epoch.
    AlreadyDelivered,
    /// No pending record exists; the alarm was cancelled.
    Cancelled,
    /// The stored record belongs to a newer registration.
    Superseded,
}

/// The single delivery sequence every path runs.
///
/// Ordering is the contract: pending lookup, then the flag claim, then a
/// re-check of the record, then the sink, then record removal. Errors from
/// the lookup and the claim propagate so the backup path can retry them;
/// once the claim is won the remaining steps never retry, keeping delivery
/// at-most-once per epoch.
pub(crate) async fn run(inner: &Inner, alarm: &Alarm, path: FirePath) -> Result<FireOutcome> {
    let order_id = alarm.order_id;

    let stored = match inner.pending.get(order_id)? {
        Some(stored) => stored,
        None => {
            debug!(%path, order_id = order_id.0, "no pending record, alarm was cancelled");
            return Ok(FireOutcome::Cancelled);
        }
    };
    if stored.epoch != alarm.epoch {
        debug!(%path, order_id = order_id.0, "stale timer for a replaced registration");
        return Ok(FireOutcome::Superseded);
    }

    if !inner.flags.try_mark_delivered(order_id, alarm.epoch)? {
        debug!(%path, order_id = order_id.0, "delivery already claimed elsewhere");
        // A claimed epoch will never fire again; drop whatever record a
        // crashed or abandoned delivery left behind.
        if let Err(e) = inner.pending.remove_if_epoch(order_id, alarm.epoch) {
            warn!(%path, order_id = order_id.0, error = %e, "failed to drop claimed alarm");
        }
        return Ok(FireOutcome::AlreadyDelivered);
    }

    // A cancel clears the flag after removing the record, so it can re-open
    // the claim for a fire already past the lookup. Re-checking the record
    // here keeps such a fire suppressed instead of delivering twice.
    match inner.pending.get(order_id) {
        Ok(Some(current)) if current.epoch == alarm.epoch => {}
        Ok(Some(_)) => {
            debug!(%path, order_id = order_id.0, "registration replaced after the claim");
            return Ok(FireOutcome::Superseded);
        }
        Ok(None) => {
            debug!(%path, order_id = order_id.0, "alarm cancelled after the claim");
            return Ok(FireOutcome::Cancelled);
        }
        // The claim is already won; an unreadable record must not turn
        // into a lost delivery.
        Err(e) => {
            warn!(%path, order_id = order_id.0, error = %e, "record re-check failed after the claim");
        }
    }

    info!(%path, order_id = order_id.0, label = %alarm.label, "delivering completion alarm");
    if let Err(e) = inner.sink.deliver(order_id, &alarm.label).await {
        // The claim stands; a failed sink is logged, never re-fired.
        warn!(%path, order_id = order_id.0, error = %e, "alarm sink failed");
    }

    if let Err(e) = inner.pending.remove_if_epoch(order_id, alarm.epoch) {
        warn!(
            %path,
            order_id = order_id.0,
            error = %e,
            "failed to drop delivered alarm; recovery will clean it up"
        );
    }

    inner.registry.complete(order_id, alarm.epoch, path);
    Ok(FireOutcome::Delivered)
}
