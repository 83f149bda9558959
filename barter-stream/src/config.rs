use crate::streams::timeout::DEFAULT_WS_READ_TIMEOUT;
use barter_cache::books::DEFAULT_BUFFER_LIMIT;
use rand::Rng;
use std::time::Duration;

/// Default interval between adapter pings on an idle connection.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between sweeps of stale pending requests.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity of every cache created by the [`MarketStore`](crate::store::MarketStore).
pub const DEFAULT_CACHE_LIMIT: usize = 1000;

/// [`StreamSession`](crate::session::StreamSession) configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Interval at which the adapter's ping payload (if any) is sent.
    pub ping_interval: Duration,
    /// Connection is considered dead if no frame arrives within this window.
    pub read_timeout: Duration,
    /// Connect retry policy used when opening a connection.
    pub reconnect: ReconnectPolicy,
    /// Interval at which pending requests without waiters (or past `future_ttl`) are swept.
    pub sweep_interval: Duration,
    /// Pending requests older than this are rejected with
    /// [`StreamError::Expired`](crate::error::StreamError::Expired). `None` disables expiry.
    pub future_ttl: Option<Duration>,
    /// Delay between subscribing to an OrderBook delta stream and fetching its snapshot, so
    /// early deltas are buffered first.
    pub snapshot_delay: Duration,
    /// Snapshot fetch attempts before an OrderBook watch is rejected.
    pub snapshot_max_retries: u32,
    /// Depth requested from the snapshot fetcher, `None` for the venue default.
    pub snapshot_limit: Option<usize>,
    /// Cache capacities.
    pub limits: CacheLimits,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            read_timeout: DEFAULT_WS_READ_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            future_ttl: None,
            snapshot_delay: Duration::ZERO,
            snapshot_max_retries: 3,
            snapshot_limit: None,
            limits: CacheLimits::default(),
        }
    }
}

impl StreamConfig {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_future_ttl(mut self, ttl: Duration) -> Self {
        self.future_ttl = Some(ttl);
        self
    }

    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    pub fn with_snapshot_max_retries(mut self, retries: u32) -> Self {
        self.snapshot_max_retries = retries;
        self
    }

    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = Some(limit);
        self
    }

    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Capacities of the caches held by the [`MarketStore`](crate::store::MarketStore).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CacheLimits {
    pub trades: usize,
    pub ohlcv: usize,
    pub orders: usize,
    pub my_trades: usize,
    pub positions: usize,
    pub book_depth: usize,
    /// Deltas buffered per OrderBook while it waits for a snapshot.
    pub book_buffer: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            trades: DEFAULT_CACHE_LIMIT,
            ohlcv: DEFAULT_CACHE_LIMIT,
            orders: DEFAULT_CACHE_LIMIT,
            my_trades: DEFAULT_CACHE_LIMIT,
            positions: DEFAULT_CACHE_LIMIT,
            book_depth: DEFAULT_CACHE_LIMIT,
            book_buffer: DEFAULT_BUFFER_LIMIT,
        }
    }
}

/// Exponential backoff with jitter applied between connect attempts.
///
/// A dropped connection is never resumed: the next watch on the same url opens a fresh
/// [`Client`](crate::client::Client), and this policy only governs how that connect is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Connect attempts before giving up, minimum 1.
    pub max_attempts: u32,
    /// Fraction of each delay (0.0..=1.0) that is randomised away.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after the `attempt`th (1-based) failed connect.
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay`, then reduced by up to `jitter` of itself.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let capped = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return capped;
        }

        let reduction = rand::rng().random_range(0.0..=jitter);
        capped.mul_f64(1.0 - reduction)
    }
}
