use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use dtn_transport::{Ipc, Transport};
use dtn_wire::encap::{self, PacketType};

use super::{driver::LocalStreamDriver, LocalStreamOptions};
use crate::{
    handle::{delegate_to_handle, Handle, Shared},
    Bundle, ConvergenceLayer, ForwardError, Outduct,
};

/// An outduct to a local process over a Unix stream socket.
#[derive(Debug)]
pub struct LocalStreamOutduct {
    handle: Handle,
    options: Arc<LocalStreamOptions>,
}

impl LocalStreamOutduct {
    pub fn new(options: LocalStreamOptions) -> Self {
        Self::with_transport(options, Ipc::new())
    }

    pub fn with_transport<T: Transport<PathBuf> + Sync>(options: LocalStreamOptions, transport: T) -> Self {
        let options = Arc::new(options);
        let shared = Arc::new(Shared::new(
            ConvergenceLayer::LocalStream,
            options.pipeline_depth,
            options.max_pipeline_bytes,
        ));
        let driver = LocalStreamDriver::new(Arc::clone(&options), transport, Arc::clone(&shared));

        Self { handle: Handle::new(shared, Box::pin(driver.run())), options }
    }

    pub fn options(&self) -> &LocalStreamOptions {
        &self.options
    }
}

#[async_trait]
impl Outduct for LocalStreamOutduct {
    fn convergence_layer(&self) -> ConvergenceLayer {
        ConvergenceLayer::LocalStream
    }

    fn forward(&self, bundle: Bundle) -> Result<(), ForwardError> {
        let len = bundle.payload.len() as u64;

        match encap::header_len(PacketType::Bp, len) {
            Ok(header_len) => self.handle.forward(bundle, header_len as u64 + len),
            Err(encap::Error::EmptyNonIdle) => Err(ForwardError::Empty(bundle)),
            Err(_) => Err(ForwardError::TooLarge(bundle)),
        }
    }

    async fn stop(&self) {
        self.handle.stop().await;
    }

    delegate_to_handle!();
}
