use tokio::sync::watch;

use crate::message::Message;
use crate::render::MessageSink;

/// Per-client sync state: the watermark, i.e. the highest message id rendered so far.
///
/// The watermark only moves forward. Every watermark change is published on a
/// watch channel so handles can observe progress without touching the session.
#[derive(Debug)]
pub struct SyncSession {
    watermark: u64,
    published: watch::Sender<u64>,
}

impl SyncSession {
    pub fn new(initial_watermark: u64) -> Self {
        let (published, _) = watch::channel(initial_watermark);
        Self {
            watermark: initial_watermark,
            published,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }

    /// Render every message newer than the watermark exactly once, in
    /// ascending id order, advancing the watermark past each. Stale and
    /// duplicate ids are dropped. Returns how many messages were rendered.
    pub fn reconcile<S>(&mut self, mut messages: Vec<Message>, sink: &mut S) -> usize
    where
        S: MessageSink + ?Sized,
    {
        messages.sort_by_key(|m| m.id);

        let mut rendered = 0;
        for message in &messages {
            if message.id <= self.watermark {
                continue;
            }
            sink.render(message);
            self.watermark = message.id;
            rendered += 1;
        }

        if rendered > 0 {
            log::debug!(
                "Rendered {} of {} message(s), watermark now {}",
                rendered,
                messages.len(),
                self.watermark
            );
            self.published.send_replace(self.watermark);
        }
        rendered
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new(0)
    }
}
