use std::time::Duration;

/// Settings for a [`SyncClient`](crate::SyncClient) and its HTTP transport.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub initial_watermark: u64,
    /// Delay between a successful fetch and the next one.
    pub poll_interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub request_timeout: Duration,
    pub default_author: String,
}

impl SyncConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_initial_watermark(mut self, watermark: u64) -> Self {
        self.initial_watermark = watermark;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max.max(initial);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = author.into();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9898".to_string(),
            initial_watermark: 1,
            poll_interval: Duration::ZERO,
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            // The server may hold a poll open until something is posted
            request_timeout: Duration::from_secs(60),
            default_author: "anonymous".to_string(),
        }
    }
}

/// Settings for a [`SocketLogger`](crate::SocketLogger) connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    /// Text sent right after the connection opens.
    pub greeting: Option<String>,
    pub origin: Option<String>,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9898/ws".to_string(),
            greeting: None,
            origin: None,
        }
    }
}
