//! Due-account selection and content rotation for Cadence feeds.
//!
//! This crate decides, on each external invocation, which publisher
//! accounts are due and what each of them posts next:
//! - Selects active accounts whose last publish is older than the interval,
//!   never-published first, then longest-waiting
//! - Rotates through an account's stored content, never-published items
//!   first, resetting the cycle once every item has been posted
//! - Skips-and-marks undeliverable content with a bounded retry count
//! - Stops cooperatively when the invocation's wall-clock budget runs out
//!
//! All rotation state lives behind the [`AccountRegistry`] and
//! [`ContentStore`] traits; nothing is cached between invocations.

mod budget;
mod error;
pub mod memory;
mod publisher;
mod rotation;
mod selector;
mod sink;
mod store;
mod types;

pub use budget::Deadline;
pub use error::{LiveFetchError, PublishError, SchedulerError, StoreError};
pub use memory::MemoryStore;
pub use publisher::{
    DEFAULT_BUDGET, DEFAULT_INTERVAL_HOURS, DEFAULT_MAX_ACCOUNTS, DEFAULT_MAX_RETRIES,
    DEBOUNCE_WINDOW, MAX_ACCOUNTS_CEILING, Publisher, PublisherConfig,
};
pub use rotation::{Pick, pick_next, reset_all};
pub use selector::{due_order, is_due, select_due};
pub use sink::{LiveSource, PublishSink};
pub use store::{AccountRegistry, ContentStore};
pub use types::*;
