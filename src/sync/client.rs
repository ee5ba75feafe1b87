//! Sync Client
//!
//! Runs the fetch → reconcile → wait loop on a single tokio task. Other
//! tasks talk to it through a [`SyncHandle`], which queues commands on a
//! channel, so the session is only ever touched by the loop itself.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::message::{Message, OutgoingMessage};
use crate::render::MessageSink;
use crate::sync::{Backoff, SyncSession};
use crate::transport::Transport;

/// Commands that can be sent to a running sync loop.
#[derive(Debug)]
pub enum SyncCommand {
    /// Post a message; the reply carries how many echoed messages were rendered.
    Send {
        text: String,
        author: String,
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Stop the loop.
    Shutdown,
}

/// Handle for talking to a spawned sync loop.
///
/// This is cheap to clone and can be shared across tasks. Dropping every
/// handle stops the loop as well.
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::UnboundedSender<SyncCommand>,
    watermark: watch::Receiver<u64>,
}

impl SyncHandle {
    /// Post a message through the loop and wait for the outcome.
    pub async fn send(&self, text: impl Into<String>, author: impl Into<String>) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SyncCommand::Send {
                text: text.into(),
                author: author.into(),
                reply,
            })
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Stop the sync loop.
    ///
    /// Commands are served in order, so a shutdown queued behind a send
    /// takes effect once that post completes, which can take up to the
    /// configured request timeout.
    pub fn shutdown(&self) {
        if self.sender.send(SyncCommand::Shutdown).is_err() {
            log::debug!("Sync loop already stopped");
        }
    }

    pub fn watermark(&self) -> u64 {
        *self.watermark.borrow()
    }

    /// Wait until the watermark reaches at least `target`.
    pub async fn wait_for_watermark(&mut self, target: u64) -> Result<u64> {
        let watermark = self
            .watermark
            .wait_for(|w| *w >= target)
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(*watermark)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Incremental sync client: owns the session, the transport and the render sink.
pub struct SyncClient<T, S> {
    transport: T,
    sink: S,
    session: SyncSession,
    backoff: Backoff,
    poll_interval: Duration,
    default_author: String,
}

impl<T, S> SyncClient<T, S>
where
    T: Transport,
    S: MessageSink,
{
    pub fn new(config: &SyncConfig, transport: T, sink: S) -> Self {
        Self {
            transport,
            sink,
            session: SyncSession::new(config.initial_watermark),
            backoff: Backoff::new(config.retry_initial, config.retry_max),
            poll_interval: config.poll_interval,
            default_author: config.default_author.clone(),
        }
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn watermark(&self) -> u64 {
        self.session.watermark()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Ask the transport for everything newer than `watermark`.
    pub async fn fetch_since(&self, watermark: u64) -> Result<Vec<Message>> {
        self.transport.fetch_since(watermark).await
    }

    /// Render the unseen messages of a batch and advance the watermark.
    pub fn reconcile(&mut self, messages: Vec<Message>) -> usize {
        self.session.reconcile(messages, &mut self.sink)
    }

    /// One fetch + reconcile round. A failed fetch leaves the watermark alone.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let batch = self.fetch_since(self.session.watermark()).await?;
        Ok(self.reconcile(batch))
    }

    /// Post a message. Blank text is ignored; a blank author falls back to the
    /// configured default. Echoed messages go through [`reconcile`](Self::reconcile).
    ///
    /// An echo moves the watermark to its own id. If other clients posted
    /// messages with lower ids that this client has not polled yet, those
    /// are never rendered.
    pub async fn send(&mut self, text: &str, author: &str) -> Result<usize> {
        post(
            &self.transport,
            &mut self.session,
            &mut self.sink,
            &self.default_author,
            text,
            author,
        )
        .await
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<SyncSession>)
    where
        T: 'static,
        S: 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = SyncHandle {
            sender,
            watermark: self.session.subscribe(),
        };
        let task = tokio::spawn(self.run(receiver));
        (handle, task)
    }

    /// Fetch, reconcile, wait, repeat until a shutdown command arrives or
    /// every command sender is gone. Returns the final session.
    ///
    /// Failed fetches are retried with exponential backoff and never end
    /// the loop. Commands are served while a fetch is in flight, so a post
    /// can go out while the server holds a long poll open.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SyncCommand>) -> SyncSession {
        log::info!("Sync loop started at watermark {}", self.session.watermark());

        let mut next_poll = Instant::now();
        'sync: loop {
            // Wait until the next poll is due
            loop {
                tokio::select! {
                    _ = time::sleep_until(next_poll) => break,
                    command = commands.recv() => {
                        if self.dispatch(command).await.is_stop() {
                            break 'sync;
                        }
                    }
                }
            }

            let watermark = self.session.watermark();
            let fetch = self.transport.fetch_since(watermark);
            tokio::pin!(fetch);

            let fetched = loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    command = commands.recv() => {
                        let flow = dispatch(
                            command,
                            &self.transport,
                            &mut self.session,
                            &mut self.sink,
                            &self.default_author,
                        )
                        .await;
                        if flow.is_stop() {
                            break 'sync;
                        }
                    }
                }
            };

            match fetched {
                Ok(batch) => {
                    self.backoff.reset();
                    self.session.reconcile(batch, &mut self.sink);
                    next_poll = Instant::now() + self.poll_interval;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    if e.is_transient() {
                        log::warn!("Fetch since {} failed, retrying in {:?}: {}", watermark, delay, e);
                    } else {
                        log::error!("Fetch since {} failed, retrying in {:?}: {}", watermark, delay, e);
                    }
                    next_poll = Instant::now() + delay;
                }
            }
        }

        log::info!("Sync loop stopped at watermark {}", self.session.watermark());
        self.session
    }

    async fn dispatch(&mut self, command: Option<SyncCommand>) -> Flow {
        dispatch(
            command,
            &self.transport,
            &mut self.session,
            &mut self.sink,
            &self.default_author,
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl Flow {
    fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

// Free functions over the client's fields so they can run while a fetch
// future still borrows the transport.

async fn dispatch<T, S>(
    command: Option<SyncCommand>,
    transport: &T,
    session: &mut SyncSession,
    sink: &mut S,
    default_author: &str,
) -> Flow
where
    T: Transport,
    S: MessageSink,
{
    match command {
        Some(SyncCommand::Send { text, author, reply }) => {
            let result = post(transport, session, sink, default_author, &text, &author).await;
            if let Err(e) = &result {
                log::warn!("Failed to send message: {}", e);
            }
            if reply.send(result).is_err() {
                log::debug!("Send result dropped: caller went away");
            }
            Flow::Continue
        }
        Some(SyncCommand::Shutdown) => {
            log::info!("Sync loop shutting down");
            Flow::Stop
        }
        None => {
            log::info!("All sync handles dropped, stopping");
            Flow::Stop
        }
    }
}

async fn post<T, S>(
    transport: &T,
    session: &mut SyncSession,
    sink: &mut S,
    default_author: &str,
    text: &str,
    author: &str,
) -> Result<usize>
where
    T: Transport,
    S: MessageSink,
{
    let Some(outgoing) = OutgoingMessage::new(text, author, default_author) else {
        log::debug!("Ignoring blank message");
        return Ok(0);
    };
    let echoed = transport.send(&outgoing).await?;
    Ok(session.reconcile(echoed, sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Transport that replays scripted poll results, then hangs like an idle long poll.
    #[derive(Default)]
    struct ScriptedTransport {
        polls: Mutex<VecDeque<Result<Vec<Message>>>>,
        requested: Mutex<Vec<(u64, Instant)>>,
        sent: Mutex<Vec<OutgoingMessage>>,
        echo_id: Mutex<u64>,
    }

    impl ScriptedTransport {
        fn with_polls(polls: Vec<Result<Vec<Message>>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }

        fn requested_watermarks(&self) -> Vec<u64> {
            self.requested.lock().unwrap().iter().map(|(w, _)| *w).collect()
        }
    }

    impl Transport for Arc<ScriptedTransport> {
        async fn fetch_since(&self, watermark: u64) -> Result<Vec<Message>> {
            self.requested.lock().unwrap().push((watermark, Instant::now()));
            let next = self.polls.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        async fn send(&self, message: &OutgoingMessage) -> Result<Vec<Message>> {
            self.sent.lock().unwrap().push(message.clone());
            let mut id = self.echo_id.lock().unwrap();
            if *id == 0 {
                return Ok(Vec::new());
            }
            *id += 1;
            Ok(vec![Message {
                id: *id,
                author: message.author.clone(),
                text: message.text.clone(),
                time: 0,
            }])
        }
    }

    fn msg(id: u64) -> Message {
        Message {
            id,
            author: "a".to_string(),
            text: "hi".to_string(),
            time: 1_700_000_000,
        }
    }

    fn transport_error() -> SyncError {
        // An unparseable URL gives a real reqwest::Error without touching the network
        let err = reqwest::Client::new().get("htp://[bad").build().unwrap_err();
        SyncError::Transport(err)
    }

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl MessageSink + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        (seen, move |m: &Message| sink_seen.lock().unwrap().push(m.id))
    }

    #[tokio::test]
    async fn poll_once_renders_new_message() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![Ok(vec![msg(2)])]));
        let (seen, sink) = recorder();
        let mut client = SyncClient::new(&SyncConfig::default(), transport.clone(), sink);

        assert_eq!(client.poll_once().await.unwrap(), 1);

        assert_eq!(client.watermark(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert_eq!(transport.requested_watermarks(), vec![1]);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_watermark() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![Err(transport_error())]));
        let (seen, sink) = recorder();
        let mut client = SyncClient::new(&SyncConfig::default(), transport, sink);

        let err = client.poll_once().await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(client.watermark(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_send_skips_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut client = SyncClient::new(&SyncConfig::default(), transport.clone(), |_: &Message| {});

        assert_eq!(client.send("   ", "bob").await.unwrap(), 0);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_defaults_author_and_reconciles_echo() {
        let transport = Arc::new(ScriptedTransport::default());
        *transport.echo_id.lock().unwrap() = 4;
        let (seen, sink) = recorder();
        let config = SyncConfig::default().with_default_author("guest");
        let mut client = SyncClient::new(&config, transport.clone(), sink);

        assert_eq!(client.send(" hello ", "  ").await.unwrap(), 1);

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![OutgoingMessage { text: "hello".into(), author: "guest".into() }]);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert_eq!(client.watermark(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_retries_with_backoff_then_recovers() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![
            Err(transport_error()),
            Err(SyncError::MalformedPayload("not an array".into())),
            Ok(vec![msg(3), msg(2)]),
        ]));
        let (seen, sink) = recorder();
        let config = SyncConfig::default()
            .with_retry(Duration::from_millis(500), Duration::from_secs(10));
        let client = SyncClient::new(&config, transport.clone(), sink);
        let start = Instant::now();

        let (mut handle, task) = client.spawn();
        assert_eq!(handle.wait_for_watermark(3).await.unwrap(), 3);
        handle.shutdown();
        let session = task.await.unwrap();

        assert_eq!(session.watermark(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);

        let requested = transport.requested.lock().unwrap().clone();
        // Two failures at the initial watermark, one success, then idle polls at 3
        let watermarks: Vec<_> = requested.iter().map(|(w, _)| *w).collect();
        assert_eq!(&watermarks[..3], &[1, 1, 1]);
        assert!(watermarks[3..].iter().all(|w| *w == 3), "watermarks: {:?}", watermarks);
        assert!(requested[1].1 - start >= Duration::from_millis(500));
        assert!(requested[2].1 - requested[1].1 >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_spaces_successful_fetches() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![
            Ok(vec![msg(2)]),
            Ok(Vec::new()),
            Ok(vec![msg(3)]),
        ]));
        let config = SyncConfig::default().with_poll_interval(Duration::from_secs(2));
        let client = SyncClient::new(&config, transport.clone(), |_: &Message| {});

        let (mut handle, task) = client.spawn();
        handle.wait_for_watermark(3).await.unwrap();
        handle.shutdown();
        task.await.unwrap();

        let requested = transport.requested.lock().unwrap().clone();
        assert!(
            transport.requested_watermarks().starts_with(&[1, 2, 2]),
            "watermarks: {:?}",
            transport.requested_watermarks()
        );
        for pair in requested.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(2));
        }
    }

    #[tokio::test]
    async fn send_is_served_during_pending_poll() {
        // No scripted polls: the first fetch never completes
        let transport = Arc::new(ScriptedTransport::default());
        *transport.echo_id.lock().unwrap() = 10;
        let (seen, sink) = recorder();
        let client = SyncClient::new(&SyncConfig::default(), transport.clone(), sink);

        let (handle, task) = client.spawn();
        assert_eq!(handle.send("ping", "alice").await.unwrap(), 1);
        assert_eq!(handle.watermark(), 11);

        handle.shutdown();
        let session = task.await.unwrap();
        assert_eq!(session.watermark(), 11);
        assert_eq!(*seen.lock().unwrap(), vec![11]);
    }

    #[tokio::test]
    async fn shutdown_waits_for_queued_send() {
        let transport = Arc::new(ScriptedTransport::default());
        *transport.echo_id.lock().unwrap() = 1;
        let (seen, sink) = recorder();
        let client = SyncClient::new(&SyncConfig::default(), transport.clone(), sink);

        let (handle, task) = client.spawn();
        let (reply, response) = oneshot::channel();
        handle
            .sender
            .send(SyncCommand::Send {
                text: "last words".into(),
                author: "bob".into(),
                reply,
            })
            .unwrap();
        handle.shutdown();

        assert_eq!(response.await.unwrap().unwrap(), 1);
        let session = task.await.unwrap();
        assert_eq!(session.watermark(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn echo_skips_unpolled_lower_ids() {
        // Another client's message 3 is still waiting in the next poll when our echo lands at 5
        let transport = Arc::new(ScriptedTransport::with_polls(vec![Ok(vec![msg(3), msg(5)])]));
        *transport.echo_id.lock().unwrap() = 4;
        let (seen, sink) = recorder();
        let mut client = SyncClient::new(&SyncConfig::default(), transport, sink);

        assert_eq!(client.send("hi", "bob").await.unwrap(), 1);
        assert_eq!(client.poll_once().await.unwrap(), 0);

        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert_eq!(client.watermark(), 5);
    }

    #[tokio::test]
    async fn dropping_all_handles_stops_loop() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = SyncClient::new(&SyncConfig::default(), transport, |_: &Message| {});

        let (handle, task) = client.spawn();
        let other = handle.clone();
        drop(handle);
        drop(other);

        let session = task.await.unwrap();
        assert_eq!(session.watermark(), 1);
    }

    #[tokio::test]
    async fn handle_after_shutdown_reports_closed() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = SyncClient::new(&SyncConfig::default(), transport, |_: &Message| {});

        let (handle, task) = client.spawn();
        handle.shutdown();
        task.await.unwrap();

        assert!(handle.is_closed());
        assert!(matches!(handle.send("hi", "bob").await, Err(SyncError::Closed)));
    }
}
