use barter_cache::CacheError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// All errors generated in `barter-stream`.
///
/// Errors are `Clone` so a single connection failure can be fanned out to every pending
/// request on that connection.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum StreamError {
    #[error("connection to {0} closed")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("read timeout: no data received within the configured window")]
    ReadTimeout,

    #[error("failed to parse url: {0}")]
    UrlParse(String),

    #[error("failed to parse frame: {0}")]
    Parse(String),

    #[error("request already pending for message hash: {0}")]
    DuplicateRequest(SmolStr),

    #[error("request for message hash {0} was dropped before completion")]
    Cancelled(SmolStr),

    #[error("request for message hash {0} expired")]
    Expired(SmolStr),

    #[error("unsubscribed from message hash: {0}")]
    Unsubscribed(SmolStr),

    #[error("watch requires at least one message hash")]
    EmptyWatch,

    #[error("topics of one watch must share a url, {0} does not")]
    MixedUrls(SmolStr),

    #[error("unexpected value resolved for message hash: {0}")]
    UnexpectedValue(SmolStr),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("OrderBook for {0} is not initialised")]
    BookNotInitialised(SmolStr),

    #[error(
        "OrderBook snapshot for {symbol} remained behind the buffered deltas after {attempts} attempts"
    )]
    SnapshotBehind { symbol: SmolStr, attempts: u32 },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl StreamError {
    /// Determine if an error terminates the connection it occurred on, as opposed to being
    /// scoped to a single request.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamError::ConnectionClosed(_)
            | StreamError::Transport(_)
            | StreamError::ReadTimeout => true,
            _ => false,
        }
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Io(error) if error.kind() == std::io::ErrorKind::TimedOut => {
                Self::ReadTimeout
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<url::ParseError> for StreamError {
    fn from(error: url::ParseError) -> Self {
        Self::UrlParse(error.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}
