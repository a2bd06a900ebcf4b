//! Client configuration.

use std::time::Duration;

use crate::correlation::CorrelationTimeouts;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for an [`OutpostClient`](crate::OutpostClient).
///
/// The server address and the local user's address are required; everything
/// else has defaults tuned for a browser-grade mobile network.
///
/// # Example
///
/// ```
/// use outpost_live_client::LiveClientConfig;
/// use std::time::Duration;
///
/// let config = LiveClientConfig::new("wss://live.example/ws", "0xA1")
///     .with_connect_timeout(Duration::from_secs(15))
///     .with_max_reconnect_attempts(8);
/// assert_eq!(config.local_address, "0xA1");
/// assert_eq!(config.keepalive_interval, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    /// WebSocket endpoint of the live-events server, without the token.
    pub server_address: String,
    /// Wallet address of the signed-in user. `user.joined` frames carrying
    /// this address confirm our own joins.
    pub local_address: String,
    /// How long to wait for the socket to open. Defaults to **20 s**.
    pub connect_timeout: Duration,
    /// Interval between keep-alive frames while connected. Defaults to **30 s**.
    pub keepalive_interval: Duration,
    /// First reconnect delay. Defaults to **1 s**.
    pub reconnect_base_delay: Duration,
    /// Cap on the reconnect delay. Defaults to **30 s**.
    pub reconnect_max_delay: Duration,
    /// Consecutive failed reconnects before giving up and raising
    /// [`LiveEvent::ReconnectExhausted`](crate::LiveEvent::ReconnectExhausted).
    /// Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Pause between losing a live socket and the first reconnect attempt.
    /// Defaults to **1 s**.
    pub link_loss_reconnect_delay: Duration,
    /// Budgets for correlated operations (joins), by connection state.
    pub timeouts: CorrelationTimeouts,
    /// Echo round-trips per health check. Defaults to **3**, clamped to ≥ 1.
    pub health_check_attempts: u32,
    /// Budget for one echo round-trip. Defaults to **5 s**.
    pub health_check_timeout: Duration,
    /// Pause between failed echo round-trips. Defaults to **1 s**.
    pub health_check_retry_delay: Duration,
    /// A frame received within this window counts as proof of health without
    /// an echo. Defaults to **2 min**.
    pub activity_window: Duration,
    /// Delay between a confirmed join and the members refresh request, so the
    /// server's room state has caught up. Defaults to **500 ms**.
    pub join_settle_delay: Duration,
    /// Join attempts made by `reliable_join`. Defaults to **3**, clamped to ≥ 1.
    pub reliable_join_attempts: u32,
    /// Base pause between `reliable_join` attempts, multiplied by the attempt
    /// number. Defaults to **1 s**.
    pub reliable_join_retry_delay: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, ordinary events are dropped (with a
    /// warning logged) rather than stalling the socket.
    /// `ReconnectExhausted` is always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long `close()` waits for the socket's close handshake before
    /// aborting it. Defaults to **1 s**.
    pub shutdown_timeout: Duration,
}

impl LiveClientConfig {
    /// Create a configuration with default tuning.
    pub fn new(server_address: impl Into<String>, local_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            local_address: local_address.into(),
            connect_timeout: Duration::from_secs(20),
            keepalive_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            link_loss_reconnect_delay: Duration::from_secs(1),
            timeouts: CorrelationTimeouts::default(),
            health_check_attempts: 3,
            health_check_timeout: Duration::from_secs(5),
            health_check_retry_delay: Duration::from_secs(1),
            activity_window: Duration::from_secs(120),
            join_settle_delay: Duration::from_millis(500),
            reliable_join_attempts: 3,
            reliable_join_retry_delay: Duration::from_secs(1),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the reconnect backoff range. `max` is raised to `base` if smaller.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max.max(base);
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_link_loss_reconnect_delay(mut self, delay: Duration) -> Self {
        self.link_loss_reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: CorrelationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set attempts and per-attempt budget of `health_check`. Attempts below
    /// 1 are clamped to 1.
    #[must_use]
    pub fn with_health_check(mut self, attempts: u32, timeout: Duration, retry_delay: Duration) -> Self {
        self.health_check_attempts = attempts.max(1);
        self.health_check_timeout = timeout;
        self.health_check_retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn with_activity_window(mut self, window: Duration) -> Self {
        self.activity_window = window;
        self
    }

    #[must_use]
    pub fn with_join_settle_delay(mut self, delay: Duration) -> Self {
        self.join_settle_delay = delay;
        self
    }

    /// Set attempts and base retry delay of `reliable_join`. Attempts below 1
    /// are clamped to 1.
    #[must_use]
    pub fn with_reliable_join(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.reliable_join_attempts = attempts.max(1);
        self.reliable_join_retry_delay = retry_delay;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
