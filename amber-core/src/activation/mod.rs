//! Serialization of concurrent update activity.
//!
//! Many clients may demand the same artifact at once. The monitor owns the
//! only path to the package filesystem's install door and guarantees that
//! each artifact is written at most once concurrently while every waiter is
//! notified exactly once on activation.

pub mod monitor;

pub use monitor::{
    ActivationMonitor, CompleteUpdateRequest, MonitorHandle,
    StartUpdateRequest, DEFAULT_CHANNEL_CAPACITY,
};
