//! `chime-core` — shared types, config, and collaborator traits for the
//! completion-alarm engine.

pub mod config;
pub mod delivery;
pub mod error;
pub mod types;

pub use config::ChimeConfig;
pub use delivery::{AlarmNotice, AlarmSink, ExactAlarmGate, SinkError};
pub use error::{ChimeError, Result};
pub use types::{now_ms, Alarm, OrderId};
