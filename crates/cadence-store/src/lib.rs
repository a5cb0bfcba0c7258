//! Durable storage for Cadence.
//!
//! [`SqliteStore`] implements both [`cadence_scheduler::AccountRegistry`]
//! and [`cadence_scheduler::ContentStore`], plus the provisioning calls the
//! command line uses to add accounts and content.

mod db;
mod store;

pub use db::SqliteStore;
