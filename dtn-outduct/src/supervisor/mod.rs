use std::{fmt, future::Future, io, sync::Arc, time::Duration};

use dtn_wire::{encap, tcpcl};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::handle::Shared;

mod backoff;
pub use backoff::{Backoff, ExponentialBackoff};

/// How a binding re-establishes its link after a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Initial delay before reconnecting. `None` disables reconnection: the first fault (or
    /// failed connect) ends the driver.
    pub delay: Option<Duration>,
    /// Upper bound of the doubling delay.
    pub max_delay: Duration,
    /// Reconnect attempts per outage before giving up. `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self { delay: Some(Duration::from_secs(3)), max_delay: Duration::from_secs(30), max_retries: None }
    }
}

impl ReconnectOptions {
    /// Never reconnects.
    pub fn one_shot() -> Self {
        Self { delay: None, ..Default::default() }
    }

    /// Reconnects every `delay`, without backing off.
    pub fn fixed(delay: Duration) -> Self {
        Self { delay: Some(delay), max_delay: delay, max_retries: None }
    }

    /// Configures from a delay in seconds, where zero disables reconnection.
    pub fn from_delay_secs(secs: u64) -> Self {
        match secs {
            0 => Self::one_shot(),
            secs => Self { delay: Some(Duration::from_secs(secs)), ..Default::default() },
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Why a session ended. Every fault takes the link down and fails the pipeline.
#[derive(Debug, Error)]
pub(crate) enum Fault {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Transport reported {actual} bytes sent, expected {expected}")]
    AckMismatch { expected: u64, actual: u64 },
    #[error("Protocol violation: {0}")]
    Protocol(#[from] tcpcl::ProtocolViolation),
    #[error("Encapsulation error: {0}")]
    Encap(#[from] encap::Error),
    #[error("Invalid contact header: {0}")]
    InvalidContactHeader(String),
    #[error("Nothing received for {0:?}")]
    IdleTimeout(Duration),
    #[error("Peer shut down the session (reason {reason:?}, reconnect delay {reconnect_delay:?})")]
    PeerShutdown { reason: Option<tcpcl::ShutdownReason>, reconnect_delay: Option<u32> },
    #[error("Unexpected data received from peer")]
    UnexpectedData,
    #[error("Connection closed by peer")]
    Eof,
}

impl From<tcpcl::Error> for Fault {
    fn from(e: tcpcl::Error) -> Self {
        match e {
            tcpcl::Error::Io(e) => Self::Io(e),
            tcpcl::Error::Protocol(v) => Self::Protocol(v),
        }
    }
}

/// Owns the connect/reconnect policy of one driver.
///
/// Connection attempts and the delays between them are cancelled as soon as the outduct is
/// stopped.
#[derive(Debug)]
pub(crate) struct ReconnectionSupervisor {
    options: ReconnectOptions,
    shared: Arc<Shared>,
    /// Backoff of the current outage, reset after a successful connect.
    backoff: Option<ExponentialBackoff>,
    /// Initial delay requested by the peer for the next outage.
    requested_delay: Option<Duration>,
}

impl ReconnectionSupervisor {
    pub(crate) fn new(options: ReconnectOptions, shared: Arc<Shared>) -> Self {
        Self { options, shared, backoff: None, requested_delay: None }
    }

    /// Connects with `connect`, waiting out the backoff between failed attempts.
    ///
    /// Returns `None` once the outduct is stopped or no further attempt is allowed.
    pub(crate) async fn connect<F, Fut, Io, E>(
        &mut self,
        remote: &(dyn fmt::Display + Sync),
        mut connect: F,
    ) -> Option<Io>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Io, E>>,
        E: fmt::Display,
    {
        loop {
            if self.shared.is_stopping() {
                return None;
            }

            let result = tokio::select! {
                result = connect() => result,
                _ = self.shared.stopped() => return None,
            };

            match result {
                Ok(io) => {
                    debug!(outduct = self.shared.uuid(), %remote, "Connected");
                    self.shared.transport_up();
                    self.backoff = None;
                    self.requested_delay = None;
                    return Some(io);
                }
                Err(e) => {
                    warn!(outduct = self.shared.uuid(), %remote, "Connect failed: {e}");
                    if !self.wait().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Takes the link down after `fault`, failing everything in flight.
    pub(crate) fn link_down(&mut self, fault: &Fault) {
        let outduct = self.shared.uuid();

        match fault {
            Fault::PeerShutdown { reconnect_delay, .. } => {
                info!(outduct, "Link down: {fault}");
                if let Some(secs) = reconnect_delay {
                    self.requested_delay = Some(Duration::from_secs(u64::from(*secs)));
                    self.backoff = None;
                }
            }
            _ => error!(outduct, "Link down: {fault}"),
        }

        self.shared.link_down();
    }

    /// Waits out the next reconnect delay. Returns `false` if the driver should exit instead.
    pub(crate) async fn wait(&mut self) -> bool {
        let Some(configured) = self.options.delay else {
            info!(outduct = self.shared.uuid(), "Reconnection disabled");
            return false;
        };

        let initial = self.requested_delay.take().unwrap_or(configured);
        let (max_delay, max_retries) = (self.options.max_delay, self.options.max_retries);
        let backoff = self.backoff.get_or_insert_with(|| {
            ExponentialBackoff::new(initial, max_retries).with_max_backoff(max_delay.max(initial))
        });

        tokio::select! {
            delay = backoff.next() => match delay {
                Some(delay) => {
                    debug!(outduct = self.shared.uuid(), ?delay, "Reconnecting");
                    true
                }
                None => {
                    error!(outduct = self.shared.uuid(), "Giving up after {} reconnect attempts", backoff.retry_count());
                    false
                }
            },
            _ = self.shared.stopped() => false,
        }
    }

    /// Final cleanup once the driver exits.
    pub(crate) fn terminate(&mut self) {
        info!(outduct = self.shared.uuid(), "Driver exiting");
        self.shared.link_down();
    }
}
