use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::config::SocketConfig;
use crate::socket::{ReadyState, SocketEvent};

/// Abnormal closure: the connection dropped without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;
/// A close frame arrived without a status code.
const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("socket {0} not found")]
    NotFound(u32),

    #[error("socket {0} is not open")]
    NotOpen(u32),

    #[error("socket {0} writer has stopped")]
    WriterGone(u32),
}

enum Outgoing {
    Text(String),
    Close,
}

/// A handle to send frames on a connection
struct SocketHandle {
    sender: mpsc::UnboundedSender<Outgoing>,
    ready_state: Arc<AtomicU32>,
}

type Registry = Arc<Mutex<HashMap<u32, SocketHandle>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u32, SocketHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A newly opened connection: its id plus the stream of events it produces.
pub struct SocketConnection {
    pub id: u32,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Manages all logged WebSocket connections
///
/// A connection stays registered until it closes, from either side.
#[derive(Default)]
pub struct SocketLogger {
    connections: Registry,
    next_id: AtomicU32,
}

impl SocketLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections that have not closed yet
    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.connections).is_empty()
    }

    /// Start connecting and return immediately. Must be called from within a tokio runtime.
    pub fn connect(&self, config: SocketConfig) -> SocketConnection {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<Outgoing>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SocketEvent>();
        let ready_state = Arc::new(AtomicU32::new(ReadyState::Connecting as u32));

        lock(&self.connections).insert(
            id,
            SocketHandle {
                sender: tx.clone(),
                ready_state: ready_state.clone(),
            },
        );

        let task = ConnectionTask {
            id,
            events: events_tx,
            ready_state,
            registry: self.connections.clone(),
        };
        tokio::spawn(run_connection(task, config, tx, rx));

        SocketConnection { id, events: events_rx }
    }

    /// Send a text frame on a connection
    pub fn send(&self, id: u32, data: impl Into<String>) -> Result<(), SocketError> {
        let connections = lock(&self.connections);
        let handle = connections.get(&id).ok_or(SocketError::NotFound(id))?;
        if handle.ready_state.load(Ordering::SeqCst) != ReadyState::Open as u32 {
            return Err(SocketError::NotOpen(id));
        }
        handle
            .sender
            .send(Outgoing::Text(data.into()))
            .map_err(|_| SocketError::WriterGone(id))
    }

    /// Start the closing handshake and forget the connection
    pub fn close(&self, id: u32) {
        let Some(handle) = lock(&self.connections).remove(&id) else {
            return;
        };
        let state = handle.ready_state.load(Ordering::SeqCst);
        if state == ReadyState::Closed as u32 {
            return;
        }
        handle
            .ready_state
            .store(ReadyState::Closing as u32, Ordering::SeqCst);
        log::info!("[Socket {}] Closing", id);
        if handle.sender.send(Outgoing::Close).is_err() {
            log::debug!("[Socket {}] Writer already stopped", id);
        }
    }

    /// Get the ready state of a connection
    pub fn ready_state(&self, id: u32) -> ReadyState {
        lock(&self.connections)
            .get(&id)
            .map(|h| ReadyState::from_u32(h.ready_state.load(Ordering::SeqCst)))
            .unwrap_or(ReadyState::Closed)
    }
}

/// State a spawned connection needs to report events and unregister itself.
struct ConnectionTask {
    id: u32,
    events: mpsc::UnboundedSender<SocketEvent>,
    ready_state: Arc<AtomicU32>,
    registry: Registry,
}

impl ConnectionTask {
    /// Log an event and push it to the connection's listener
    fn dispatch(&self, event: SocketEvent) {
        let id = self.id;
        match &event {
            SocketEvent::Open => log::info!("[Socket {}] open", id),
            SocketEvent::Message(text) => {
                log::info!("[Socket {}] message: {}", id, truncate(text, 200))
            }
            SocketEvent::Binary(len) => log::info!("[Socket {}] message: <{} bytes binary>", id, len),
            SocketEvent::Close { code, reason } => {
                log::info!("[Socket {}] close: {} {}", id, code, reason)
            }
            SocketEvent::Error(message) => log::error!("[Socket {}] error: {}", id, message),
        }
        if self.events.send(event).is_err() {
            log::debug!("[Socket {}] No listener for events", id);
        }
    }

    /// Mark closed, unregister, then emit `close`. Listeners that see the
    /// close event can rely on the id being gone.
    fn finish(&self, code: u16, reason: String) {
        self.ready_state.store(ReadyState::Closed as u32, Ordering::SeqCst);
        lock(&self.registry).remove(&self.id);
        self.dispatch(SocketEvent::Close { code, reason });
    }

    /// Emit `error` followed by an abnormal `close`
    fn fail(&self, message: String, reason: &str) {
        self.ready_state.store(ReadyState::Closed as u32, Ordering::SeqCst);
        self.dispatch(SocketEvent::Error(message));
        self.finish(CLOSE_ABNORMAL, reason.to_string());
    }
}

async fn run_connection(
    conn: ConnectionTask,
    config: SocketConfig,
    tx: mpsc::UnboundedSender<Outgoing>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let id = conn.id;
    log::info!("[Socket {}] Connecting to {}", id, config.url);

    // Parse URL to get host and port
    let url = match url::Url::parse(&config.url) {
        Ok(u) => u,
        Err(e) => {
            conn.fail(format!("Invalid URL: {}", e), "Invalid URL");
            return;
        }
    };

    let host = url.host_str().unwrap_or("localhost");
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });
    let addr = format!("{}:{}", host, port);

    log::debug!("[Socket {}] Connecting TCP to {}", id, addr);

    let tcp_stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            conn.fail(format!("TCP connection failed: {}", e), "Connection failed");
            return;
        }
    };

    let mut request = match config.url.as_str().into_client_request() {
        Ok(req) => req,
        Err(e) => {
            conn.fail(format!("Invalid request: {}", e), "Invalid request");
            return;
        }
    };

    if let Some(origin) = &config.origin {
        match HeaderValue::from_str(origin) {
            Ok(value) => {
                request.headers_mut().insert("Origin", value);
            }
            Err(e) => log::warn!("[Socket {}] Ignoring invalid origin {:?}: {}", id, origin, e),
        }
    }

    log::debug!("[Socket {}] Performing WebSocket handshake", id);

    let ws_stream = match tokio_tungstenite::client_async(request, tcp_stream).await {
        Ok((stream, response)) => {
            log::debug!("[Socket {}] Handshake done (status: {})", id, response.status());
            stream
        }
        Err(e) => {
            conn.fail(format!("Handshake failed: {}", e), "Handshake failed");
            return;
        }
    };

    // A close() that raced the handshake wins
    if conn
        .ready_state
        .compare_exchange(
            ReadyState::Connecting as u32,
            ReadyState::Open as u32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        conn.dispatch(SocketEvent::Open);
        if let Some(greeting) = config.greeting {
            if tx.send(Outgoing::Text(greeting)).is_err() {
                log::debug!("[Socket {}] Writer gone before greeting", id);
            }
        }
    }
    drop(tx);

    let (mut write, mut read) = ws_stream.split();

    // Forward outgoing frames
    let send_task = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let frame = match outgoing {
                Outgoing::Text(text) => Message::Text(text.into()),
                Outgoing::Close => Message::Close(None),
            };
            let closing = matches!(frame, Message::Close(_));
            if let Err(e) = write.send(frame).await {
                log::error!("[Socket {}] Send error: {}", id, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut closed = false;
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                conn.dispatch(SocketEvent::Message(text.as_str().to_string()));
            }
            Ok(Message::Binary(data)) => {
                conn.dispatch(SocketEvent::Binary(data.len()));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                // Handled by tungstenite
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                conn.finish(code, reason);
                closed = true;
                break;
            }
            Err(e) => {
                conn.fail(e.to_string(), "Connection error");
                closed = true;
                break;
            }
        }
    }

    if !closed {
        // Stream ended without a close frame
        conn.finish(CLOSE_ABNORMAL, String::new());
    }

    send_task.abort();
    log::debug!("[Socket {}] Connection ended", id);
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
