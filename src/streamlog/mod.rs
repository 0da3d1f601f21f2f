//! In-process broadcast log for execution-trace records
//!
//! This module provides the streaming primitive behind the debug pages:
//! - **EventLog**: a named, capacity-bounded fan-out log
//! - **Subscription**: a subscriber's private ring queue plus an unsubscribe handle
//! - **read_window**: a drain of a subscription bounded by count and wall-clock time
//!
//! ## Backpressure
//!
//! Publishing never blocks. When a subscriber's queue is full its oldest queued
//! entry is evicted to make room, so a slow reader always sees the most recent
//! `capacity` entries. Evictions are silent to the publisher and are only
//! visible through [`StreamStats`] and the `streamlog_dropped_total` counter.

pub mod log;
pub mod window;

pub use log::{EventLog, StreamStats, Subscription, SubscriptionId, Unsubscriber};
pub use window::{read_window, WindowRequest};
