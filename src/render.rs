//! Render Callbacks
//!
//! Defines where newly seen messages go once the sync client accepts them.

use tokio::sync::mpsc;

use crate::message::Message;

/// Receives each newly seen message exactly once, in ascending id order.
///
/// Implementors decide how a message is shown (a terminal line, a UI list
/// entry, a channel to another task). The sync client knows nothing else
/// about presentation.
pub trait MessageSink: Send {
    fn render(&mut self, message: &Message);
}

impl<F> MessageSink for F
where
    F: FnMut(&Message) + Send,
{
    fn render(&mut self, message: &Message) {
        self(message)
    }
}

/// Forward messages to another task.
impl MessageSink for mpsc::UnboundedSender<Message> {
    fn render(&mut self, message: &Message) {
        if let Err(e) = self.send(message.clone()) {
            log::warn!("Dropping message {}: receiver closed ({})", message.id, e);
        }
    }
}

/// Fans one message out to several sinks.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Box<dyn MessageSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MessageSink for SinkRegistry {
    fn render(&mut self, message: &Message) {
        for sink in &mut self.sinks {
            sink.render(message);
        }
    }
}
