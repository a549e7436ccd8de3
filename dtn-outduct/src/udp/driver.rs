use std::sync::Arc;

use dtn_transport::udp;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::{rate::RateLimiter, UdpOptions};
use crate::{
    handle::Shared,
    supervisor::{Fault, ReconnectionSupervisor},
};

pub(crate) struct UdpDriver {
    options: Arc<UdpOptions>,
    shared: Arc<Shared>,
    supervisor: ReconnectionSupervisor,
}

impl UdpDriver {
    pub(crate) fn new(options: Arc<UdpOptions>, shared: Arc<Shared>) -> Self {
        let supervisor = ReconnectionSupervisor::new(options.reconnect.clone(), Arc::clone(&shared));
        Self { options, shared, supervisor }
    }

    pub(crate) async fn run(mut self) {
        let mut limiter =
            RateLimiter::new(self.options.rate_bits_per_sec, self.options.rate_precision_window);

        loop {
            let remote = self.options.remote.clone();
            let Some(socket) = self.supervisor.connect(&remote, || udp::connect(&remote)).await else {
                break;
            };

            match self.session(&socket, &mut limiter).await {
                Ok(()) => break,
                Err(fault) => {
                    self.supervisor.link_down(&fault);
                    if !self.supervisor.wait().await {
                        break;
                    }
                }
            }
        }

        self.supervisor.terminate();
    }

    async fn session(&self, socket: &UdpSocket, limiter: &mut RateLimiter) -> Result<(), Fault> {
        self.shared.link_up();
        debug!(outduct = self.shared.uuid(), burst = ?limiter.burst(), "Datagram session started");

        loop {
            self.send_pending(socket, limiter).await?;

            tokio::select! {
                biased;

                _ = self.shared.stopped() => return Ok(()),

                _ = limiter.tick(), if limiter.is_armed() => {
                    trace!(outduct = self.shared.uuid(), tokens = ?limiter.remaining(), "Refill");
                }

                _ = self.shared.pipeline.notified() => {}
            }
        }
    }

    /// Sends queued datagrams in order while the rate allows.
    async fn send_pending(&self, socket: &UdpSocket, limiter: &mut RateLimiter) -> Result<(), Fault> {
        while let Some((_, payload)) = self.shared.pipeline.front() {
            if !limiter.try_take(payload.len()) {
                limiter.arm_for(payload.len());
                break;
            }

            let written = socket.send(&payload).await?;

            debug!(outduct = self.shared.uuid(), bytes = payload.len(), "Datagram sent");
            self.shared.stats.increment_sent(payload.len());
            self.shared.release_front(written as u64)?;
        }

        if limiter.is_refilling() {
            limiter.arm();
        }

        Ok(())
    }
}
