use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection to the alarm database at `path` with the pragmas every
/// connection needs: WAL journaling and a busy timeout, so writers on
/// separate connections queue instead of surfacing `SQLITE_BUSY`.
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Initialise the alarm schema in `conn`.
///
/// Creates both tables (idempotent). `pending_alarms` holds not-yet-delivered
/// completion alarms, one row per order; `delivery_flags` records which epoch
/// of an alarm has already been delivered so the two timer paths can
/// de-duplicate against each other and across restarts.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_alarms (
            order_id    INTEGER NOT NULL PRIMARY KEY,
            label       TEXT    NOT NULL,
            target_ms   INTEGER NOT NULL,   -- absolute epoch milliseconds, UTC
            epoch       TEXT    NOT NULL,   -- UUID of this registration
            created_at  TEXT    NOT NULL
        ) STRICT;

        -- Recovery scans by target time on every boot.
        CREATE INDEX IF NOT EXISTS idx_pending_alarms_target
            ON pending_alarms (target_ms);

        CREATE TABLE IF NOT EXISTS delivery_flags (
            order_id     INTEGER NOT NULL PRIMARY KEY,
            epoch        TEXT    NOT NULL,
            delivered_at TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingStore;
    use chime_core::{Alarm, OrderId};

    // The gateway opens one connection per store over a single database
    // file; interleaved writers must queue on the busy timeout, not error.
    #[test]
    fn concurrent_connections_share_one_database_file() {
        let path = std::env::temp_dir().join(format!(
            "chime-db-shared-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let setup = open_db(&path).expect("open for migrations");
        init_db(&setup).expect("init schema");

        let left = PendingStore::new(open_db(&path).expect("open left writer"));
        let right = PendingStore::new(open_db(&path).expect("open right writer"));

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..100 {
                    let alarm = Alarm::new(OrderId(i), "left writer", 1_000 + i);
                    left.put(&alarm).expect("left put");
                }
            });
            s.spawn(|| {
                for i in 100..200 {
                    let alarm = Alarm::new(OrderId(i), "right writer", 1_000 + i);
                    right.put(&alarm).expect("right put");
                }
            });
        });

        assert_eq!(left.get_all().expect("read back").len(), 200);
        let _ = std::fs::remove_file(&path);
    }
}
