//! Incremental Sync Client
//!
//! Keeps a watermark (highest message id seen) and repeatedly reconciles
//! local state with the server's ordered message log, exposing each new
//! message exactly once in ascending id order.

mod backoff;
mod client;
mod session;

pub use backoff::Backoff;
pub use client::{SyncClient, SyncCommand, SyncHandle};
pub use session::SyncSession;
