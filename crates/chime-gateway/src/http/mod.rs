pub mod alarms;
pub mod health;
