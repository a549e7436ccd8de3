use futures::{FutureExt, Stream};
use std::{
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};
use tokio::time::{sleep, Sleep};

/// Floor applied when doubling, so a zero initial delay cannot turn into a busy loop.
const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Helper trait alias for backoff streams.
/// We define any stream that yields `Duration`s as a backoff
pub trait Backoff: Stream<Item = Duration> + Unpin {}

// Blanket implementation of `Backoff` for any stream that yields `Duration`s.
impl<T> Backoff for T where T: Stream<Item = Duration> + Unpin {}

/// A stream that yields exponentially increasing backoff durations.
///
/// Each item is yielded once the previous delay has elapsed. The timer for the next delay only
/// starts when the stream is polled again, so time spent on a connection attempt between two
/// polls is not counted against the next delay.
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Current number of retries.
    retry_count: usize,
    /// Maximum number of retries before closing the stream.
    /// If `None`, the stream will retry indefinitely.
    max_retries: Option<usize>,
    /// The current backoff duration.
    backoff: Duration,
    /// Upper bound for `backoff`.
    max_backoff: Duration,
    /// The current backoff timeout, if any.
    /// We need the timeout to be pinned (`Sleep` is not `Unpin`)
    timeout: Option<Pin<Box<Sleep>>>,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff stream with the given initial duration and max retries.
    pub fn new(initial: Duration, max_retries: Option<usize>) -> Self {
        Self { retry_count: 0, max_retries, backoff: initial, max_backoff: Duration::MAX, timeout: None }
    }

    /// Caps the delay at `max`.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self.backoff = self.backoff.min(max);
        self
    }

    /// Returns the number of delays yielded so far.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }
}

impl Stream for ExponentialBackoff {
    type Item = Duration;

    /// Polls the exponential backoff stream. Returns `Poll::Ready` with the delay that just
    /// elapsed, or `None` once the retry budget is spent.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(max_retries) = this.max_retries {
            if this.retry_count >= max_retries {
                return Poll::Ready(None);
            }
        }

        let backoff = this.backoff;
        let timeout = this.timeout.get_or_insert_with(|| Box::pin(sleep(backoff)));

        ready!(timeout.poll_unpin(cx));

        this.timeout = None;
        this.retry_count += 1;
        this.backoff = backoff.saturating_mul(2).max(MIN_BACKOFF).min(this.max_backoff);

        Poll::Ready(Some(backoff))
    }
}
