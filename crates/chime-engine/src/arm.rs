use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use chime_core::{now_ms, OrderId};

use crate::fire::FirePath;

/// Sleep duration until an absolute wall-clock instant; zero if already past.
pub(crate) fn delay_until(target_ms: i64) -> Duration {
    let delta = target_ms - now_ms();
    if delta <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(delta as u64)
    }
}

/// One armed timer pair for a single registration.
///
/// The slot is reserved before the tasks spawn and the handles attached
/// after, so a past-due timer that fires immediately still finds the entry
/// to report against.
struct ArmedPair {
    epoch: Uuid,
    /// Timer tasks armed for this epoch (1 when exact scheduling is denied).
    tasks: u8,
    /// Tasks that ended without delivering.
    finished: u8,
    primary: Option<JoinHandle<()>>,
    backup: Option<JoinHandle<()>>,
}

impl ArmedPair {
    fn abort(&self) {
        if let Some(handle) = &self.primary {
            handle.abort();
        }
        if let Some(handle) = &self.backup {
            handle.abort();
        }
    }

    /// Abort the other path once `path` has delivered.
    fn abort_sibling(&self, path: FirePath) {
        match path {
            FirePath::Primary => {
                if let Some(handle) = &self.backup {
                    handle.abort();
                }
            }
            FirePath::Backup => {
                if let Some(handle) = &self.primary {
                    handle.abort();
                }
            }
            // Recovery fires are never armed, so nothing here is live.
            FirePath::Recovery => self.abort(),
        }
    }
}

/// In-memory registry of armed timer pairs, keyed by order id.
///
/// Registrations are not persisted; the pending store is the durable truth
/// and recovery re-derives every pair on process start. Entries leave the
/// registry on cancel, on replacement by a newer epoch, when a path
/// delivers ([`complete`](ArmRegistry::complete)), or once every task of
/// the pair has ended without delivering
/// ([`settle`](ArmRegistry::settle)).
#[derive(Default)]
pub(crate) struct ArmRegistry {
    armed: DashMap<i64, ArmedPair>,
}

impl ArmRegistry {
    /// Reserve the slot for a fresh registration before its tasks spawn,
    /// aborting whatever a previous epoch had armed.
    pub(crate) fn reserve(&self, order_id: OrderId, epoch: Uuid, tasks: u8) {
        let pair = ArmedPair {
            epoch,
            tasks,
            finished: 0,
            primary: None,
            backup: None,
        };
        if let Some(previous) = self.armed.insert(order_id.0, pair) {
            previous.abort();
            debug!(order_id = order_id.0, "replaced armed timer pair");
        }
    }

    /// Attach the spawned handles to a reserved slot. When the slot is
    /// already gone (every task reported, or a newer epoch took over) the
    /// handles are aborted instead of attached.
    pub(crate) fn attach(
        &self,
        order_id: OrderId,
        epoch: Uuid,
        primary: Option<JoinHandle<()>>,
        backup: JoinHandle<()>,
    ) {
        match self.armed.get_mut(&order_id.0) {
            Some(mut pair) if pair.epoch == epoch => {
                pair.primary = primary;
                pair.backup = Some(backup);
            }
            _ => {
                if let Some(handle) = primary {
                    handle.abort();
                }
                backup.abort();
            }
        }
    }

    /// Abort and drop the pair for `order_id`. Returns whether one was armed.
    pub(crate) fn disarm(&self, order_id: OrderId) -> bool {
        match self.armed.remove(&order_id.0) {
            Some((_, pair)) => {
                pair.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the pair once `path` finished delivering `epoch` and abort the
    /// sibling task. A mismatched epoch means a newer registration owns the
    /// slot, which is left untouched.
    pub(crate) fn complete(&self, order_id: OrderId, epoch: Uuid, path: FirePath) {
        if let Some((_, pair)) = self.armed.remove_if(&order_id.0, |_, p| p.epoch == epoch) {
            pair.abort_sibling(path);
        }
    }

    /// Record that one task of `epoch`'s pair ended without delivering.
    ///
    /// The entry is dropped once every task has reported, so an abandoned
    /// or lost delivery still leaves no armed state behind. The sibling is
    /// never aborted here; it may be the winner mid-delivery.
    pub(crate) fn settle(&self, order_id: OrderId, epoch: Uuid) {
        if let Entry::Occupied(mut entry) = self.armed.entry(order_id.0) {
            if entry.get().epoch != epoch {
                return;
            }
            let pair = entry.get_mut();
            pair.finished += 1;
            if pair.finished >= pair.tasks {
                entry.remove();
            }
        }
    }

    /// Abort every armed pair. Returns how many there were.
    pub(crate) fn abort_all(&self) -> usize {
        let mut count = 0;
        self.armed.retain(|_, pair| {
            pair.abort();
            count += 1;
            false
        });
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    fn arm_pair(registry: &ArmRegistry, order_id: OrderId, epoch: Uuid, exact: bool) {
        registry.reserve(order_id, epoch, 1 + exact as u8);
        let primary = exact.then(dummy_task);
        registry.attach(order_id, epoch, primary, dummy_task());
    }

    #[test]
    fn delay_until_clamps_past_targets_to_zero() {
        assert_eq!(delay_until(0), Duration::ZERO);
        assert_eq!(delay_until(now_ms() - 10_000), Duration::ZERO);
        assert!(delay_until(now_ms() + 60_000) > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn arm_and_disarm_track_armed_pairs() {
        let registry = ArmRegistry::default();
        arm_pair(&registry, OrderId(1), Uuid::now_v7(), true);
        assert_eq!(registry.len(), 1);

        assert!(registry.disarm(OrderId(1)));
        assert_eq!(registry.len(), 0);
        assert!(!registry.disarm(OrderId(1)));
    }

    #[tokio::test]
    async fn reserve_replaces_the_previous_epoch() {
        let registry = ArmRegistry::default();
        arm_pair(&registry, OrderId(2), Uuid::now_v7(), false);
        arm_pair(&registry, OrderId(2), Uuid::now_v7(), true);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn complete_ignores_a_mismatched_epoch() {
        let registry = ArmRegistry::default();
        let current = Uuid::now_v7();
        arm_pair(&registry, OrderId(3), current, false);

        // A stale callback must not evict the newer registration.
        registry.complete(OrderId(3), Uuid::now_v7(), FirePath::Backup);
        assert_eq!(registry.len(), 1);

        registry.complete(OrderId(3), current, FirePath::Backup);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn settle_drops_the_pair_once_every_task_reports() {
        let registry = ArmRegistry::default();
        let epoch = Uuid::now_v7();
        arm_pair(&registry, OrderId(4), epoch, true);

        registry.settle(OrderId(4), epoch);
        assert_eq!(registry.len(), 1, "one task still due");
        registry.settle(OrderId(4), epoch);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn settle_ignores_a_mismatched_epoch() {
        let registry = ArmRegistry::default();
        let current = Uuid::now_v7();
        arm_pair(&registry, OrderId(5), current, false);

        registry.settle(OrderId(5), Uuid::now_v7());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn a_task_finishing_before_attach_still_clears_the_slot() {
        let registry = ArmRegistry::default();
        let epoch = Uuid::now_v7();

        // Backup-only pair whose task reaches a terminal outcome between
        // reserve and attach (a past-due target fires immediately).
        registry.reserve(OrderId(6), epoch, 1);
        registry.settle(OrderId(6), epoch);
        assert_eq!(registry.len(), 0);

        registry.attach(OrderId(6), epoch, None, dummy_task());
        assert_eq!(registry.len(), 0, "late attach must not resurrect the slot");
    }

    #[tokio::test]
    async fn abort_all_empties_the_registry() {
        let registry = ArmRegistry::default();
        arm_pair(&registry, OrderId(7), Uuid::now_v7(), true);
        arm_pair(&registry, OrderId(8), Uuid::now_v7(), false);
        assert_eq!(registry.abort_all(), 2);
        assert_eq!(registry.len(), 0);
    }
}
