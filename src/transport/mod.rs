//! Transport Layer
//!
//! The network primitives the sync client needs: fetch everything newer
//! than a watermark, and post a message. `HttpTransport` talks to the
//! `/poll` + `/msg` HTTP endpoints; tests provide scripted transports.

mod http;

use std::future::Future;

use crate::error::Result;
use crate::message::{Message, OutgoingMessage};

pub use http::HttpTransport;

pub trait Transport: Send + Sync {
    /// All messages with `id > watermark`. The batch may be empty, unsorted,
    /// or contain ids the caller has already seen.
    fn fetch_since(&self, watermark: u64) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Post a message. Returns whatever newly visible messages the server echoes back.
    fn send(&self, message: &OutgoingMessage) -> impl Future<Output = Result<Vec<Message>>> + Send;
}
