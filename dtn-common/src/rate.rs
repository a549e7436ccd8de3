use std::time::Duration;

/// Token bucket arithmetic for rate limiting.
///
/// Tokens accumulate at `rate_tokens` per `per` and the bucket holds at most the amount that
/// accumulates over one `window` (the burst limit). The balance is kept in denormalized units of
/// `tokens * per_nanos` so that partial tokens earned by short ticks are carried forward instead
/// of being rounded away.
///
/// The bucket is plain data with no clock of its own: callers advance it with
/// [`add_time`](Self::add_time).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens earned per `per_nanos`.
    rate_tokens: u128,
    /// Length of the rate interval in nanoseconds.
    per_nanos: u128,
    /// Burst limit in denormalized units.
    limit: i128,
    /// Current balance in denormalized units. Negative while borrowing.
    remain: i128,
}

impl TokenBucket {
    /// Creates a full bucket earning `rate_tokens` every `per`, capped at what accumulates over
    /// `window`.
    pub fn new(rate_tokens: u64, per: Duration, window: Duration) -> Self {
        let per_nanos = per.as_nanos().max(1);
        let rate_tokens = rate_tokens as u128;
        let limit_tokens = rate_tokens * window.as_nanos() / per_nanos;
        let limit = (limit_tokens * per_nanos) as i128;

        Self { rate_tokens, per_nanos, limit, remain: limit }
    }

    /// Returns the burst limit in tokens.
    pub fn limit(&self) -> u64 {
        (self.limit / self.per_nanos as i128) as u64
    }

    /// Credits the tokens earned over `elapsed`, capped at the burst limit.
    pub fn add_time(&mut self, elapsed: Duration) {
        let earned = (self.rate_tokens * elapsed.as_nanos()).min(i128::MAX as u128) as i128;
        self.remain = self.remain.saturating_add(earned).min(self.limit);
    }

    /// Returns the number of whole tokens available. Zero while the bucket is borrowed.
    pub fn remaining_tokens(&self) -> u64 {
        if self.remain <= 0 {
            0
        } else {
            (self.remain / self.per_nanos as i128) as u64
        }
    }

    /// Returns `true` if the bucket holds its full burst limit.
    pub fn is_full(&self) -> bool {
        self.remain >= self.limit
    }

    /// Tries to take `tokens` from the bucket.
    ///
    /// A request larger than the whole burst limit can never be satisfied from the balance, so it
    /// is granted only when the bucket is full and drives the balance negative. The debt is paid
    /// back by subsequent [`add_time`](Self::add_time) calls before anything else is granted.
    pub fn take_tokens(&mut self, tokens: u64) -> bool {
        let need = tokens as i128 * self.per_nanos as i128;

        if need <= self.remain || (need > self.limit && self.is_full()) {
            self.remain -= need;
            true
        } else {
            false
        }
    }

    /// Returns how long it takes, at the configured rate, until `tokens` can be taken. Returns
    /// [`Duration::ZERO`] if they are available now.
    pub fn time_until(&self, tokens: u64) -> Duration {
        let need = (tokens as i128 * self.per_nanos as i128).min(self.limit);
        let missing = need - self.remain;

        if missing <= 0 || self.rate_tokens == 0 {
            return Duration::ZERO;
        }

        let nanos = (missing as u128).div_ceil(self.rate_tokens);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}
