use std::{pin::Pin, time::Duration};

use dtn_common::TokenBucket;
use tokio::time::{sleep, Instant, Sleep};

/// Shortest refill period, for very small precision windows.
const MIN_REFILL_PERIOD: Duration = Duration::from_millis(1);

/// Paces datagrams against a byte-denominated [`TokenBucket`].
///
/// The bucket is credited from the clock whenever tokens are taken. The refill timer only wakes
/// the driver: a blocked send arms it for the moment its tokens are available, a bucket that is
/// merely refilling arms it at a fifth of the precision window, and it is left idle otherwise.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    /// `None` when unlimited.
    bucket: Option<TokenBucket>,
    refill_period: Duration,
    last_refill: Instant,
    timer: Pin<Box<Sleep>>,
    armed: bool,
}

impl RateLimiter {
    pub(crate) fn new(rate_bits_per_sec: u64, window: Duration) -> Self {
        let bucket = (rate_bits_per_sec > 0).then(|| {
            TokenBucket::new((rate_bits_per_sec / 8).max(1), Duration::from_secs(1), window)
        });

        Self {
            bucket,
            refill_period: (window / 5).max(MIN_REFILL_PERIOD),
            last_refill: Instant::now(),
            timer: Box::pin(sleep(Duration::ZERO)),
            armed: false,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        if let Some(bucket) = self.bucket.as_mut() {
            bucket.add_time(now - self.last_refill);
        }
        self.last_refill = now;
    }

    /// Takes tokens for a `bytes` long datagram. On `false` nothing was taken.
    pub(crate) fn try_take(&mut self, bytes: usize) -> bool {
        self.refill();

        match self.bucket.as_mut() {
            Some(bucket) => bucket.take_tokens(bytes as u64),
            None => true,
        }
    }

    /// Returns `true` while the bucket is below its burst limit.
    pub(crate) fn is_refilling(&self) -> bool {
        self.bucket.as_ref().is_some_and(|bucket| !bucket.is_full())
    }

    /// Whole tokens currently available, `None` when unlimited.
    pub(crate) fn remaining(&self) -> Option<u64> {
        self.bucket.as_ref().map(TokenBucket::remaining_tokens)
    }

    /// Burst limit in bytes, `None` when unlimited.
    pub(crate) fn burst(&self) -> Option<u64> {
        self.bucket.as_ref().map(TokenBucket::limit)
    }

    /// Arms the refill timer for when a `bytes` long datagram can be taken, unless the timer is
    /// already running.
    pub(crate) fn arm_for(&mut self, bytes: usize) {
        let wait = match self.bucket.as_ref() {
            Some(bucket) => bucket.time_until(bytes as u64),
            None => Duration::ZERO,
        };

        self.arm_after(wait.max(MIN_REFILL_PERIOD));
    }

    /// Arms the refill timer at the refill period unless it is already running.
    pub(crate) fn arm(&mut self) {
        self.arm_after(self.refill_period);
    }

    fn arm_after(&mut self, delay: Duration) {
        if !self.armed {
            self.timer.as_mut().reset(Instant::now() + delay);
            self.armed = true;
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    /// Completes when the armed refill timer fires. Cancel safe.
    pub(crate) async fn tick(&mut self) {
        self.timer.as_mut().await;
        self.armed = false;
        self.refill();
    }
}
