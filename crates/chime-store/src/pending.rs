use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use chime_core::{Alarm, OrderId};

use crate::error::{Result, StoreError};

/// Durable store of not-yet-delivered completion alarms.
///
/// Wraps a single SQLite connection in a `Mutex`. Every mutation is a single
/// statement, so readers never observe a partially written record and each
/// write is durable before the call returns.
pub struct PendingStore {
    db: Mutex<Connection>,
}

impl PendingStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert or replace the alarm for its order.
    ///
    /// A fresh `schedule` call overwrites whatever was stored before,
    /// including the epoch, which is what invalidates stale timer callbacks.
    #[instrument(skip(self, alarm), fields(order_id = alarm.order_id.0, target_ms = alarm.target_ms))]
    pub fn put(&self, alarm: &Alarm) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO pending_alarms (order_id, label, target_ms, epoch, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(order_id) DO UPDATE SET
                 label      = excluded.label,
                 target_ms  = excluded.target_ms,
                 epoch      = excluded.epoch,
                 created_at = excluded.created_at",
            rusqlite::params![
                alarm.order_id.0,
                alarm.label,
                alarm.target_ms,
                alarm.epoch.to_string(),
                alarm.created_at,
            ],
        )?;
        debug!("pending alarm stored");
        Ok(())
    }

    /// Delete the record for `order_id`. Returns `false` when nothing was
    /// stored; cancelling an unknown order is a no-op, not an error.
    #[instrument(skip(self), fields(order_id = order_id.0))]
    pub fn remove(&self, order_id: OrderId) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM pending_alarms WHERE order_id = ?1",
            [order_id.0],
        )?;
        Ok(n > 0)
    }

    /// Delete the record only while its stored epoch still matches `epoch`.
    ///
    /// Used by the fire sequence after delivery, so a callback for an old
    /// registration can never clobber a record written by a newer `schedule`.
    #[instrument(skip(self, epoch), fields(order_id = order_id.0))]
    pub fn remove_if_epoch(&self, order_id: OrderId, epoch: Uuid) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM pending_alarms WHERE order_id = ?1 AND epoch = ?2",
            rusqlite::params![order_id.0, epoch.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Retrieve the alarm for `order_id`, `None` if no record exists.
    pub fn get(&self, order_id: OrderId) -> Result<Option<Alarm>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT order_id, label, target_ms, epoch, created_at
             FROM pending_alarms WHERE order_id = ?1",
            [order_id.0],
            row_to_alarm,
        ) {
            Ok(alarm) => Ok(Some(alarm)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All pending alarms, soonest target first. A corrupt row surfaces as
    /// an error rather than being silently skipped.
    pub fn get_all(&self) -> Result<Vec<Alarm>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT order_id, label, target_ms, epoch, created_at
             FROM pending_alarms ORDER BY target_ms",
        )?;
        let alarms = stmt
            .query_map([], row_to_alarm)?
            .collect::<rusqlite::Result<Vec<Alarm>>>()?;
        Ok(alarms)
    }
}

/// Map a SQLite row to an `Alarm`.
fn row_to_alarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alarm> {
    let epoch_str: String = row.get(3)?;
    let epoch = epoch_str.parse::<Uuid>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Alarm {
        order_id: OrderId(row.get(0)?),
        label: row.get(1)?,
        target_ms: row.get(2)?,
        epoch,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn mem_store() -> PendingStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        init_db(&conn).expect("init schema");
        PendingStore::new(conn)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = mem_store();
        let alarm = Alarm::new(OrderId(42), "Bath service", 1_700_000_005_000);
        store.put(&alarm).unwrap();

        let got = store.get(OrderId(42)).unwrap().expect("record exists");
        assert_eq!(got, alarm);
    }

    #[test]
    fn get_unknown_order_returns_none() {
        let store = mem_store();
        assert!(store.get(OrderId(404)).unwrap().is_none());
    }

    #[test]
    fn put_replaces_previous_registration() {
        let store = mem_store();
        let first = Alarm::new(OrderId(7), "Morning visit", 1_000);
        let second = Alarm::new(OrderId(7), "Evening visit", 2_000);
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let got = store.get(OrderId(7)).unwrap().expect("record exists");
        assert_eq!(got.label, "Evening visit");
        assert_eq!(got.epoch, second.epoch);
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn remove_reports_whether_a_record_existed() {
        let store = mem_store();
        let alarm = Alarm::new(OrderId(1), "X", 1_000);
        store.put(&alarm).unwrap();

        assert!(store.remove(OrderId(1)).unwrap());
        assert!(!store.remove(OrderId(1)).unwrap());
    }

    #[test]
    fn remove_if_epoch_ignores_a_newer_registration() {
        let store = mem_store();
        let old = Alarm::new(OrderId(3), "First", 1_000);
        store.put(&old).unwrap();
        let new = Alarm::new(OrderId(3), "Second", 2_000);
        store.put(&new).unwrap();

        // A stale callback holding the old epoch must not delete the new row.
        assert!(!store.remove_if_epoch(OrderId(3), old.epoch).unwrap());
        assert!(store.get(OrderId(3)).unwrap().is_some());

        assert!(store.remove_if_epoch(OrderId(3), new.epoch).unwrap());
        assert!(store.get(OrderId(3)).unwrap().is_none());
    }

    #[test]
    fn get_all_orders_by_target_time() {
        let store = mem_store();
        store.put(&Alarm::new(OrderId(1), "Later", 9_000)).unwrap();
        store.put(&Alarm::new(OrderId(2), "Sooner", 1_000)).unwrap();
        store.put(&Alarm::new(OrderId(3), "Middle", 5_000)).unwrap();

        let all = store.get_all().unwrap();
        let ids: Vec<i64> = all.iter().map(|a| a.order_id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
