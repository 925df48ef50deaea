use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use chime_core::OrderId;

use crate::error::{Result, StoreError};

/// Records which epoch of an alarm has already been delivered.
///
/// `try_mark_delivered` is the only de-duplication primitive in the engine:
/// both timer paths race through it and exactly one caller per epoch sees
/// `true`. The durable claim is a single conditional upsert, so it stays
/// atomic across restarts; the `DashMap` entry guard serializes in-process
/// callers per order and doubles as a fast path for repeat losers. The flag
/// only counts as set once SQLite has accepted the write.
pub struct DeliveryFlagStore {
    db: Mutex<Connection>,
    /// In-memory mirror of delivered epochs, keyed by order id.
    delivered: DashMap<i64, Uuid>,
}

impl DeliveryFlagStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            delivered: DashMap::new(),
        }
    }

    /// Atomically claim delivery of `epoch` for `order_id`.
    ///
    /// Returns `true` iff this call transitioned the flag from unset (or set
    /// for an older epoch) to set-for-`epoch`. Every other caller, on any
    /// path, in this process or a restarted one, gets `false` for the same
    /// epoch. On a storage error nothing is claimed and the caller may retry.
    #[instrument(skip(self, epoch), fields(order_id = order_id.0))]
    pub fn try_mark_delivered(&self, order_id: OrderId, epoch: Uuid) -> Result<bool> {
        match self.delivered.entry(order_id.0) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == epoch {
                    return Ok(false);
                }
                // A previous registration's flag is on record; this epoch
                // supersedes it.
                let won = self.claim(order_id, epoch)?;
                entry.insert(epoch);
                Ok(won)
            }
            Entry::Vacant(entry) => {
                let won = self.claim(order_id, epoch)?;
                // Mirror the durable state either way: a lost claim here
                // means the row already carried this epoch (e.g. delivered
                // before a restart).
                entry.insert(epoch);
                if won {
                    debug!("delivery claimed");
                }
                Ok(won)
            }
        }
    }

    /// Remove the flag for `order_id` so a future registration can deliver.
    /// Called on cancel and on fresh schedules; unknown orders are a no-op.
    #[instrument(skip(self), fields(order_id = order_id.0))]
    pub fn clear(&self, order_id: OrderId) -> Result<()> {
        self.delivered.remove(&order_id.0);
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM delivery_flags WHERE order_id = ?1",
            [order_id.0],
        )?;
        Ok(())
    }

    /// Whether `epoch` has already been delivered for `order_id`.
    pub fn is_delivered(&self, order_id: OrderId, epoch: Uuid) -> Result<bool> {
        if let Some(stored) = self.delivered.get(&order_id.0) {
            return Ok(*stored == epoch);
        }
        let db = self.db.lock().unwrap();
        Ok(stored_epoch(&db, order_id)? == Some(epoch))
    }

    /// The conditional upsert that decides the race: one changed row means
    /// the claim was won, zero means this epoch already held the flag.
    fn claim(&self, order_id: OrderId, epoch: Uuid) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT INTO delivery_flags (order_id, epoch, delivered_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(order_id) DO UPDATE SET
                 epoch        = excluded.epoch,
                 delivered_at = excluded.delivered_at
             WHERE delivery_flags.epoch <> excluded.epoch",
            rusqlite::params![
                order_id.0,
                epoch.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(n > 0)
    }
}

/// Read the durable flag row, `None` if the order was never delivered.
fn stored_epoch(db: &Connection, order_id: OrderId) -> Result<Option<Uuid>> {
    match db.query_row(
        "SELECT epoch FROM delivery_flags WHERE order_id = ?1",
        [order_id.0],
        |row| row.get::<_, String>(0),
    ) {
        Ok(s) => {
            let epoch = s.parse::<Uuid>().map_err(|e| {
                StoreError::Database(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                ))
            })?;
            Ok(Some(epoch))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Database(e)),
    }
}
