//! Read timeout wrapper for WebSocket streams.
//!
//! Detects silent disconnections that never produce an explicit error: if no frame arrives
//! within the configured window, the stream yields a `TimedOut` IO error, which the
//! connection read loop treats as fatal.

use crate::transport::{WsError, WsMessage};
use futures::Stream;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Default read timeout for WebSocket streams (2 minutes).
pub const DEFAULT_WS_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that fails with a timeout error when the inner stream stays idle for
/// `timeout_duration`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_WS_READ_TIMEOUT)
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    type Item = Result<WsMessage, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "WebSocket read timeout - no data received"
                    );

                    // Avoid immediately timing out again if polled after the error
                    self.deadline
                        .as_mut()
                        .reset(Instant::now() + timeout_duration);

                    Poll::Ready(Some(Err(WsError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data received for {timeout_duration:?}"),
                    )))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
