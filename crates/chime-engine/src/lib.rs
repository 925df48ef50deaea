//! `chime-engine` — exactly-once completion-alarm delivery on top of two
//! unreliable timer paths.
//!
//! # Overview
//!
//! Every scheduled alarm is persisted first, then armed twice:
//!
//! | Path    | Fires at        | Guarantee                              |
//! |---------|-----------------|----------------------------------------|
//! | primary | target          | exact, but may be silently denied      |
//! | backup  | target + margin | at least once, tolerates coarse timers |
//!
//! Both paths run the same fire sequence, which claims a durable
//! check-and-set flag before touching the sink; the path that loses the race
//! backs off without delivering. Boot recovery rebuilds both paths from the
//! pending store, so process death never loses an alarm.

pub mod engine;
pub mod error;
pub mod recovery;

mod arm;
mod backup;
mod fire;

pub use engine::{AlarmEngine, EngineConfig};
pub use error::{EngineError, Result};
pub use recovery::RecoveryReport;
