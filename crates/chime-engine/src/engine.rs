use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use chime_core::{Alarm, AlarmSink, ExactAlarmGate, OrderId};
use chime_store::{DeliveryFlagStore, PendingStore};

use crate::arm::{self, ArmRegistry};
use crate::backup;
use crate::error::{EngineError, Result};
use crate::fire::{self, FireOutcome, FirePath};
use crate::recovery::{self, RecoveryReport};

/// Upper bound on one fire attempt on the exact path. A delivery that cannot
/// finish inside this window is abandoned and left to the backup timer.
const DELIVERY_WINDOW: Duration = Duration::from_secs(10);

/// Timer tuning for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far the backup timer trails the target when the exact path is armed.
    pub margin: Duration,
    /// Backup trail when exact scheduling is denied. Kept short because the
    /// backup is then the only path that will fire.
    pub degraded_margin: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(chime_core::config::DEFAULT_MARGIN_SECS),
            degraded_margin: Duration::from_secs(chime_core::config::DEFAULT_DEGRADED_MARGIN_SECS),
        }
    }
}

/// Shared state behind the facade; every armed timer task holds a clone.
pub(crate) struct Inner {
    pub(crate) pending: Arc<PendingStore>,
    pub(crate) flags: Arc<DeliveryFlagStore>,
    pub(crate) sink: Arc<dyn AlarmSink>,
    pub(crate) gate: Arc<dyn ExactAlarmGate>,
    pub(crate) registry: ArmRegistry,
    pub(crate) config: EngineConfig,
}

/// Facade over the whole engine: schedule, cancel, boot recovery, shutdown.
///
/// Cheap to clone; all clones share the same stores and armed-task registry.
/// Methods are synchronous but must be called from within a Tokio runtime,
/// since arming spawns the timer tasks.
#[derive(Clone)]
pub struct AlarmEngine {
    pub(crate) inner: Arc<Inner>,
}

impl AlarmEngine {
    pub fn new(
        pending: Arc<PendingStore>,
        flags: Arc<DeliveryFlagStore>,
        sink: Arc<dyn AlarmSink>,
        gate: Arc<dyn ExactAlarmGate>,
        config: EngineConfig,
    ) -> Result<Self> {
        if config.margin.is_zero() || config.degraded_margin.is_zero() {
            return Err(EngineError::InvalidConfig(
                "backup margins must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                pending,
                flags,
                sink,
                gate,
                registry: ArmRegistry::default(),
                config,
            }),
        })
    }

    /// Register (or replace) the completion alarm for an order.
    ///
    /// The record is persisted before anything is armed, so a crash in
    /// between leaves a stored alarm that boot recovery picks up.
    #[instrument(skip(self, label), fields(order_id = order_id.0, target_ms))]
    pub fn schedule(&self, order_id: OrderId, label: &str, target_ms: i64) -> Result<Alarm> {
        let alarm = Alarm::new(order_id, label, target_ms);
        self.inner.pending.put(&alarm)?;
        // A replaced registration must be able to deliver again, so any flag
        // left by a previous epoch is dropped.
        self.inner.flags.clear(order_id)?;
        self.arm(&alarm);
        info!(target = %alarm.target_utc(), "alarm scheduled");
        Ok(alarm)
    }

    /// Cancel any pending alarm for `order_id`; unknown orders are a no-op.
    ///
    /// Returns `true` when a stored record was removed.
    #[instrument(skip(self), fields(order_id = order_id.0))]
    pub fn cancel(&self, order_id: OrderId) -> Result<bool> {
        let disarmed = self.inner.registry.disarm(order_id);
        let removed = self.inner.pending.remove(order_id)?;
        self.inner.flags.clear(order_id)?;
        if removed || disarmed {
            info!("alarm cancelled");
        } else {
            debug!("cancel for unknown order, nothing to do");
        }
        Ok(removed)
    }

    /// All stored (undelivered) alarms, soonest target first.
    pub fn pending(&self) -> Result<Vec<Alarm>> {
        Ok(self.inner.pending.get_all()?)
    }

    /// Number of orders with an armed timer pair.
    pub fn armed_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Rebuild timer state from the durable store after a process start.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        recovery::run(self).await
    }

    /// Abort every armed timer task. Stored alarms are untouched and will be
    /// re-armed by recovery on the next start.
    pub fn shutdown(&self) {
        let aborted = self.inner.registry.abort_all();
        if aborted > 0 {
            info!(count = aborted, "armed timers aborted for shutdown");
        }
    }

    /// Arm the timer pair for `alarm`. The exact path is skipped when the
    /// host denies precise wakeups, and the backup margin tightens to
    /// compensate.
    pub(crate) fn arm(&self, alarm: &Alarm) {
        let exact = self.inner.gate.can_schedule_exact();
        let margin = if exact {
            self.inner.config.margin
        } else {
            self.inner.config.degraded_margin
        };

        // Reserve the registry slot first: a past-due timer can reach its
        // terminal outcome before both handles exist, and it must find the
        // entry to report against.
        let tasks = 1 + exact as u8;
        self.inner
            .registry
            .reserve(alarm.order_id, alarm.epoch, tasks);
        let primary = exact.then(|| tokio::spawn(run_primary(self.inner.clone(), alarm.clone())));
        let backup = tokio::spawn(backup::run(self.inner.clone(), alarm.clone(), margin));
        self.inner
            .registry
            .attach(alarm.order_id, alarm.epoch, primary, backup);

        if exact {
            debug!(
                order_id = alarm.order_id.0,
                margin_secs = margin.as_secs(),
                "armed exact and backup timers"
            );
        } else {
            warn!(
                order_id = alarm.order_id.0,
                margin_secs = margin.as_secs(),
                "exact scheduling denied, armed backup timer only"
            );
        }
    }
}

/// Exact-path timer task: sleeps to the target instant, then runs one fire
/// attempt inside the delivery window. Every outcome short of a delivery is
/// reported to the registry so the pair is dropped once both tasks are done.
async fn run_primary(inner: Arc<Inner>, alarm: Alarm) {
    tokio::time::sleep(arm::delay_until(alarm.target_ms)).await;
    debug!(order_id = alarm.order_id.0, "exact timer elapsed");

    match tokio::time::timeout(DELIVERY_WINDOW, fire::run(&inner, &alarm, FirePath::Primary)).await
    {
        Ok(Ok(FireOutcome::Delivered)) => {
            debug!(order_id = alarm.order_id.0, "exact path delivered");
        }
        Ok(Ok(outcome)) => {
            inner.registry.settle(alarm.order_id, alarm.epoch);
            debug!(order_id = alarm.order_id.0, ?outcome, "exact path stood down");
        }
        Ok(Err(e)) => {
            inner.registry.settle(alarm.order_id, alarm.epoch);
            warn!(
                order_id = alarm.order_id.0,
                error = %e,
                "exact path fire failed, backup timer still armed"
            );
        }
        Err(_) => {
            inner.registry.settle(alarm.order_id, alarm.epoch);
            error!(
                order_id = alarm.order_id.0,
                "delivery window expired on the exact path"
            );
        }
    }
}
