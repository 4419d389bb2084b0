//! Emergency action queue

pub mod queue;

pub use queue::{EmergencyAction, EmergencyKind, EmergencyQueue, EmergencyStatus};
