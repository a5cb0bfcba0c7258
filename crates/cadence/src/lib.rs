//! Cadence: scheduled posting for a fleet of Bluesky feed accounts.
//!
//! Wires the scheduler from `cadence-scheduler` to SQLite storage, a
//! Bluesky publish sink, and a live card source, and exposes an HTTP
//! trigger for cron-style invocation.

pub mod config;
mod error;
pub mod live;
pub mod routes;
pub mod sink;

pub use error::CadenceError;
