//! ATProto XRPC client for publishing Cadence posts.
//!
//! Covers the small slice of the protocol a feed account needs: creating
//! and refreshing a session, uploading an image blob, and creating an
//! `app.bsky.feed.post` record with an optional images embed.

mod client;
mod error;
mod types;

pub use client::{BlueskyClient, DEFAULT_PDS_URL};
pub use error::BlueskyError;
pub use types::*;
