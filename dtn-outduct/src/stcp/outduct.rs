use std::sync::Arc;

use async_trait::async_trait;
use dtn_transport::{HostPort, Tcp, Transport};
use dtn_wire::stcp;

use super::{driver::StcpDriver, StcpOptions};
use crate::{
    handle::{delegate_to_handle, Handle, Shared},
    Bundle, ConvergenceLayer, ForwardError, Outduct,
};

/// An STCP outduct.
#[derive(Debug)]
pub struct StcpOutduct {
    handle: Handle,
    options: Arc<StcpOptions>,
}

impl StcpOutduct {
    /// Creates an outduct that connects over TCP once [`connect`](Outduct::connect) is called.
    pub fn new(options: StcpOptions) -> Self {
        Self::with_transport(options, Tcp::default())
    }

    /// Creates an outduct over a custom stream transport.
    pub fn with_transport<T: Transport<HostPort> + Sync>(options: StcpOptions, transport: T) -> Self {
        let options = Arc::new(options);
        let shared = Arc::new(Shared::new(
            ConvergenceLayer::Stcp,
            options.pipeline_depth,
            options.max_pipeline_bytes,
        ));
        let driver = StcpDriver::new(Arc::clone(&options), transport, Arc::clone(&shared));

        Self { handle: Handle::new(shared, Box::pin(driver.run())), options }
    }

    pub fn options(&self) -> &StcpOptions {
        &self.options
    }
}

#[async_trait]
impl Outduct for StcpOutduct {
    fn convergence_layer(&self) -> ConvergenceLayer {
        ConvergenceLayer::Stcp
    }

    fn forward(&self, bundle: Bundle) -> Result<(), ForwardError> {
        if bundle.payload.is_empty() {
            return Err(ForwardError::Empty(bundle));
        }

        let Ok(len) = u32::try_from(bundle.payload.len()) else {
            return Err(ForwardError::TooLarge(bundle));
        };

        self.handle.forward(bundle, (stcp::HEADER_LEN as u64) + u64::from(len))
    }

    async fn stop(&self) {
        self.handle.stop().await;
    }

    delegate_to_handle!();
}
