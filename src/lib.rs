//! Snoozer: defer reopening a URL to a later time, once or on a schedule.
//!
//! # Architecture
//!
//! - **Records**: occurrences (one firing) and schedules (weekly/monthly rules)
//!   live in a flat key/value [`store`], partitioned by id prefix
//! - **Recurrence**: pure next-occurrence math, DST-safe via `chrono-tz`
//! - **Engine**: the claim protocol, firing, recurring advance and the
//!   catch-up sweeps ([`scheduler`])
//! - **Collaborators**: a [`timer`] facility, an [`action`] executor that
//!   reopens URLs, and a [`clock`]
//!
//! Each pending occurrence has one live timer; each firing executes at most
//! once, whichever of the timer or a sweep claims it first.

pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod paths;
pub mod request;
pub mod scheduler;
pub mod store;
pub mod timer;

pub use action::{ActionExecutor, SourceRef};
pub use config::SnoozeConfig;
pub use error::{Result, SnoozeError};
pub use request::{PendingItems, SnoozeService, SnoozeTime};
pub use scheduler::{ReconciliationEngine, SnoozeRunner};
pub use store::{DurableStore, JsonFileStore, MemoryStore};
pub use timer::{TimerFacility, TokioTimers};
