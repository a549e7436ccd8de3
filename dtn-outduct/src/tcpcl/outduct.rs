use std::sync::Arc;

use async_trait::async_trait;
use dtn_transport::{HostPort, Tcp, Transport};

use super::{driver::TcpclDriver, TcpclOptions};
use crate::{
    handle::{delegate_to_handle, Handle, Shared},
    Bundle, ConvergenceLayer, ForwardError, Outduct,
};

/// A TCPCL v3 outduct.
#[derive(Debug)]
pub struct TcpclOutduct {
    handle: Handle,
    options: Arc<TcpclOptions>,
}

impl TcpclOutduct {
    /// Creates an outduct that connects over TCP once [`connect`](Outduct::connect) is called.
    pub fn new(options: TcpclOptions) -> Self {
        Self::with_transport(options, Tcp::default())
    }

    /// Creates an outduct over a custom stream transport.
    pub fn with_transport<T: Transport<HostPort> + Sync>(options: TcpclOptions, transport: T) -> Self {
        let options = Arc::new(options);
        let shared = Arc::new(Shared::new(
            ConvergenceLayer::TcpclV3,
            options.pipeline_depth,
            options.max_pipeline_bytes,
        ));
        let driver = TcpclDriver::new(Arc::clone(&options), transport, Arc::clone(&shared));

        Self { handle: Handle::new(shared, Box::pin(driver.run())), options }
    }

    pub fn options(&self) -> &TcpclOptions {
        &self.options
    }
}

#[async_trait]
impl Outduct for TcpclOutduct {
    fn convergence_layer(&self) -> ConvergenceLayer {
        ConvergenceLayer::TcpclV3
    }

    fn forward(&self, bundle: Bundle) -> Result<(), ForwardError> {
        // Segment lengths and acks are 32-bit on the wire
        let Ok(len) = u32::try_from(bundle.payload.len()) else {
            return Err(ForwardError::TooLarge(bundle));
        };

        self.handle.forward(bundle, u64::from(len))
    }

    async fn stop(&self) {
        self.handle.stop().await;
    }

    delegate_to_handle!();
}
