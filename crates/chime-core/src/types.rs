use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Care-order identifier, assigned by the host application.
///
/// One order has at most one pending completion alarm; scheduling again for
/// the same order replaces the previous registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl OrderId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A pending service-completion alarm. One row per active order.
///
/// `epoch` identifies this particular registration (UUIDv7 — time-sortable
/// for easier log correlation). A re-schedule for the same order writes a
/// fresh epoch, so timer callbacks armed under the old epoch recognise
/// themselves as stale instead of firing against the new registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub order_id: OrderId,
    /// Human-readable service label, shown verbatim in the notification.
    pub label: String,
    /// Absolute wall-clock target in epoch milliseconds (UTC).
    pub target_ms: i64,
    pub epoch: Uuid,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl Alarm {
    /// Build a fresh registration with a new epoch.
    pub fn new(order_id: OrderId, label: &str, target_ms: i64) -> Self {
        Self {
            order_id,
            label: label.to_string(),
            target_ms,
            epoch: Uuid::now_v7(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// True once the target instant has passed.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.target_ms <= now_ms
    }

    /// Target instant as a UTC datetime, for logs. Falls back to the epoch
    /// origin if `target_ms` is out of chrono's range.
    pub fn target_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.target_ms)
            .single()
            .unwrap_or_default()
    }
}

/// Current wall-clock time in epoch milliseconds (UTC).
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_alarms_get_distinct_epochs() {
        let a = Alarm::new(OrderId(1), "Bath service", 1_700_000_000_000);
        let b = Alarm::new(OrderId(1), "Bath service", 1_700_000_000_000);
        assert_ne!(a.epoch, b.epoch);
    }

    #[test]
    fn expiry_is_inclusive_of_the_target_instant() {
        let alarm = Alarm::new(OrderId(9), "Meal prep", 5_000);
        assert!(alarm.is_expired(5_000));
        assert!(alarm.is_expired(5_001));
        assert!(!alarm.is_expired(4_999));
    }

    #[test]
    fn order_id_serialises_as_plain_integer() {
        let id = OrderId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: OrderId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}
