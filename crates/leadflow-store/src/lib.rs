//! # leadflow-store
//!
//! SQLite-backed persistence for the lead lifecycle engine.

pub mod delivery_log;
pub mod store;

pub use delivery_log::{DeliveryAttempt, DeliveryLog, ItemKind};
pub use store::{BookingOutcome, FollowUpPolicy, ResponseOutcome, SendCompletion, Store};
