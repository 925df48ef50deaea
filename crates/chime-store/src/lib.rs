//! `chime-store` — SQLite-backed durable state for the alarm engine.
//!
//! Two stores share one schema (see [`db::init_db`]):
//!
//! * [`PendingStore`] — the authoritative set of not-yet-delivered alarms.
//!   Timer registrations are ephemeral; this table is what boot recovery
//!   rebuilds them from.
//! * [`DeliveryFlagStore`] — the check-and-set flag both timer paths race
//!   through, which is what turns two at-least-once paths into exactly-once
//!   delivery.

pub mod db;
pub mod error;
pub mod flags;
pub mod pending;

pub use db::{init_db, open_db};
pub use error::{Result, StoreError};
pub use flags::DeliveryFlagStore;
pub use pending::PendingStore;
