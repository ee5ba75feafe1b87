//! # chat_sync
//!
//! Client side of a small polling chat service. The core is an incremental
//! sync loop: fetch everything newer than the last seen message id, render
//! each new message exactly once in id order, advance the watermark, repeat.
//!
//! ## Example
//!
//! ```no_run
//! use chat_sync::{HttpTransport, Message, SyncClient, SyncConfig};
//!
//! # async fn demo() -> chat_sync::Result<()> {
//! let config = SyncConfig::default().with_base_url("http://127.0.0.1:9898");
//! let transport = HttpTransport::new(&config)?;
//! let client = SyncClient::new(&config, transport, |m: &Message| {
//!     println!("{}", m.display_line(chat_sync::unix_now()));
//! });
//!
//! let (handle, task) = client.spawn();
//! handle.send("hello", "").await?;
//! handle.shutdown();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod render;
pub mod socket;
pub mod sync;
pub mod transport;

pub use config::{SocketConfig, SyncConfig};
pub use error::{Result, SyncError};
pub use message::{Message, OutgoingMessage, unix_now};
pub use render::{MessageSink, SinkRegistry};
pub use socket::{ReadyState, SocketConnection, SocketError, SocketEvent, SocketLogger};
pub use sync::{Backoff, SyncClient, SyncCommand, SyncHandle, SyncSession};
pub use transport::{HttpTransport, Transport};
