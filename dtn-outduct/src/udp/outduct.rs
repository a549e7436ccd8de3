use std::sync::Arc;

use async_trait::async_trait;
use dtn_transport::udp::MAX_DATAGRAM_LEN;

use super::{driver::UdpDriver, UdpOptions};
use crate::{
    handle::{delegate_to_handle, Handle, Shared},
    Bundle, ConvergenceLayer, ForwardError, Outduct,
};

/// A UDP outduct.
#[derive(Debug)]
pub struct UdpOutduct {
    handle: Handle,
    options: Arc<UdpOptions>,
}

impl UdpOutduct {
    pub fn new(options: UdpOptions) -> Self {
        let options = Arc::new(options);
        let shared = Arc::new(Shared::new(
            ConvergenceLayer::Udp,
            options.pipeline_depth,
            options.max_pipeline_bytes,
        ));
        let driver = UdpDriver::new(Arc::clone(&options), Arc::clone(&shared));

        Self { handle: Handle::new(shared, Box::pin(driver.run())), options }
    }

    pub fn options(&self) -> &UdpOptions {
        &self.options
    }
}

#[async_trait]
impl Outduct for UdpOutduct {
    fn convergence_layer(&self) -> ConvergenceLayer {
        ConvergenceLayer::Udp
    }

    fn forward(&self, bundle: Bundle) -> Result<(), ForwardError> {
        if bundle.payload.len() > MAX_DATAGRAM_LEN {
            return Err(ForwardError::TooLarge(bundle));
        }

        let len = bundle.payload.len() as u64;
        self.handle.forward(bundle, len)
    }

    async fn stop(&self) {
        self.handle.stop().await;
    }

    delegate_to_handle!();
}
