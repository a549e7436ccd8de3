use std::{collections::BTreeMap, sync::Arc};

use dtn_common::{Eid, EidError, EidPattern};
use futures::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::{
    Bundle, ConvergenceLayer, ForwardError, LocalStreamOptions, LocalStreamOutduct, Outduct,
    OutductConfig, OutductEvent, OutductTelemetry, OutductsConfig, StcpOptions, StcpOutduct,
    TcpclOptions, TcpclOutduct, UdpOptions, UdpOutduct, UnknownConvergenceLayer,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid destination EID: {0}")]
    InvalidEid(#[from] EidError),
    #[error("Destination {0} is already routed")]
    DuplicateDestination(EidPattern),
    #[error("Next hop node {0} already has an outduct")]
    DuplicateNextHop(u64),
    #[error("Destination {0} conflicts with a route to the same node")]
    WildcardConflict(EidPattern),
    #[error(transparent)]
    UnknownConvergenceLayer(#[from] UnknownConvergenceLayer),
    #[error("Outduct {0:?} has no remote endpoint configured")]
    MissingEndpoint(String),
    #[error("No outduct for next hop node {0}")]
    UnknownNextHop(u64),
}

/// What an outduct can carry, as advertised to routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutductCapabilities {
    pub uuid: u64,
    pub name: String,
    pub convergence_layer: ConvergenceLayer,
    pub next_hop_node_id: u64,
    pub max_bundles_in_pipeline: usize,
    pub max_sum_bundle_bytes_in_pipeline: u64,
    pub final_destinations: Vec<EidPattern>,
}

#[derive(Debug)]
struct Entry {
    outduct: Arc<dyn Outduct>,
    name: String,
    next_hop_node_id: u64,
    max_sum_bundle_bytes_in_pipeline: u64,
}

/// Routing tables. The uuid of an outduct is its index in `entries`.
#[derive(Debug, Default)]
struct Routes {
    entries: Vec<Entry>,
    /// `ipn:N.*` routes by node number
    by_node: FxHashMap<u64, usize>,
    /// Fully qualified routes
    by_eid: BTreeMap<Eid, usize>,
    by_next_hop: FxHashMap<u64, usize>,
}

impl Routes {
    fn lookup(&self, destination: &Eid) -> Option<usize> {
        self.by_node.get(&destination.node).or_else(|| self.by_eid.get(destination)).copied()
    }

    fn has_exact_route_to_node(&self, node: u64) -> bool {
        self.by_eid.range(Eid::new(node, 0)..=Eid::new(node, u64::MAX)).next().is_some()
    }

    /// Checks `patterns` against the existing routes and against each other.
    fn check(&self, patterns: &[EidPattern]) -> Result<(), RegistryError> {
        for (i, pattern) in patterns.iter().enumerate() {
            let earlier = &patterns[..i];

            match pattern {
                EidPattern::AnyService(node) => {
                    if self.by_node.contains_key(node) || earlier.contains(pattern) {
                        return Err(RegistryError::DuplicateDestination(*pattern));
                    }
                    if self.has_exact_route_to_node(*node) ||
                        earlier.iter().any(|p| matches!(p, EidPattern::Exact(e) if e.node == *node))
                    {
                        return Err(RegistryError::WildcardConflict(*pattern));
                    }
                }
                EidPattern::Exact(eid) => {
                    if self.by_eid.contains_key(eid) || earlier.contains(pattern) {
                        return Err(RegistryError::DuplicateDestination(*pattern));
                    }
                    if self.by_node.contains_key(&eid.node) ||
                        earlier.contains(&EidPattern::AnyService(eid.node))
                    {
                        return Err(RegistryError::WildcardConflict(*pattern));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Maps destination endpoints to outducts and owns their lifecycle.
///
/// All outducts report into one event channel, taken once with
/// [`take_events`](Self::take_events).
#[derive(Debug)]
pub struct OutductRegistry {
    routes: Mutex<Routes>,
    events_tx: mpsc::UnboundedSender<OutductEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<OutductEvent>>>,
}

impl Default for OutductRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OutductRegistry {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self { routes: Mutex::new(Routes::default()), events_tx, events_rx: Mutex::new(Some(events_rx)) }
    }

    /// Builds and registers an outduct for every configured element. `local_node_id` is our
    /// own node number, announced by TCPCL contact headers.
    pub fn load(&self, config: &OutductsConfig, local_node_id: u64) -> Result<(), RegistryError> {
        for element in &config.elements {
            let outduct = build(element, local_node_id)?;
            self.insert(element, outduct)?;
        }

        Ok(())
    }

    /// Registers `outduct` under the routes described by `config`. Returns the assigned uuid.
    pub fn insert(
        &self,
        config: &OutductConfig,
        outduct: Arc<dyn Outduct>,
    ) -> Result<u64, RegistryError> {
        let patterns = config
            .final_destination_eid_uris
            .iter()
            .map(|uri| uri.parse::<EidPattern>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut routes = self.routes.lock();

        routes.check(&patterns)?;
        if routes.by_next_hop.contains_key(&config.next_hop_node_id) {
            return Err(RegistryError::DuplicateNextHop(config.next_hop_node_id));
        }

        let index = routes.entries.len();
        let uuid = index as u64;

        for pattern in &patterns {
            match pattern {
                EidPattern::AnyService(node) => routes.by_node.insert(*node, index),
                EidPattern::Exact(eid) => routes.by_eid.insert(*eid, index),
            };
        }
        routes.by_next_hop.insert(config.next_hop_node_id, index);

        outduct.set_uuid(uuid);
        outduct.set_event_sink(self.events_tx.clone());
        routes.entries.push(Entry {
            outduct,
            name: config.name.clone(),
            next_hop_node_id: config.next_hop_node_id,
            max_sum_bundle_bytes_in_pipeline: config.max_sum_bundle_bytes_in_pipeline,
        });

        info!(uuid, name = %config.name, next_hop = config.next_hop_node_id, "Outduct registered");
        Ok(uuid)
    }

    /// Takes the stream of events from all registered outducts. Returns `None` after the first
    /// call.
    pub fn take_events(&self) -> Option<UnboundedReceiverStream<OutductEvent>> {
        self.events_rx.lock().take().map(UnboundedReceiverStream::new)
    }

    /// Starts every outduct's driver.
    pub fn connect_all(&self) {
        for outduct in self.outducts() {
            outduct.connect();
        }
    }

    /// Returns the outduct that carries bundles for `destination`. A node wildcard route wins
    /// over a fully qualified one.
    pub fn outduct_for(&self, destination: &Eid) -> Option<Arc<dyn Outduct>> {
        let routes = self.routes.lock();
        routes.lookup(destination).map(|index| Arc::clone(&routes.entries[index].outduct))
    }

    /// Forwards `bundle` through the outduct routed for `destination`.
    pub fn forward(&self, destination: &Eid, bundle: Bundle) -> Result<(), ForwardError> {
        match self.outduct_for(destination) {
            Some(outduct) => outduct.forward(bundle),
            None => Err(ForwardError::NoRoute(*destination, bundle)),
        }
    }

    pub fn by_uuid(&self, uuid: u64) -> Option<Arc<dyn Outduct>> {
        let routes = self.routes.lock();
        let index = usize::try_from(uuid).ok()?;
        routes.entries.get(index).map(|entry| Arc::clone(&entry.outduct))
    }

    pub fn by_next_hop(&self, node_id: u64) -> Option<Arc<dyn Outduct>> {
        let routes = self.routes.lock();
        routes.by_next_hop.get(&node_id).map(|index| Arc::clone(&routes.entries[*index].outduct))
    }

    /// Routes every bundle for `final_destination_node` through the outduct of `next_hop`.
    ///
    /// Existing fully qualified routes to the node are re-pointed; if there are none, the node
    /// gets a wildcard route.
    pub fn reroute(&self, final_destination_node: u64, next_hop: u64) -> Result<(), RegistryError> {
        let mut routes = self.routes.lock();

        let index = *routes.by_next_hop.get(&next_hop).ok_or(RegistryError::UnknownNextHop(next_hop))?;

        let mut repointed = 0;
        for (_, route) in routes
            .by_eid
            .range_mut(Eid::new(final_destination_node, 0)..=Eid::new(final_destination_node, u64::MAX))
        {
            *route = index;
            repointed += 1;
        }

        if repointed == 0 {
            routes.by_node.insert(final_destination_node, index);
        }

        info!(final_destination_node, next_hop, uuid = index, "Rerouted");
        Ok(())
    }

    /// Returns `true` if every registered outduct can accept bundles.
    pub fn all_ready_to_forward(&self) -> bool {
        self.outducts().iter().all(|outduct| outduct.ready_to_forward())
    }

    pub fn telemetry(&self) -> Vec<OutductTelemetry> {
        self.outducts().iter().map(|outduct| outduct.telemetry()).collect()
    }

    pub fn capabilities(&self) -> Vec<OutductCapabilities> {
        let routes = self.routes.lock();

        routes
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let mut final_destinations: Vec<_> = routes
                    .by_node
                    .iter()
                    .filter(|(_, route)| **route == index)
                    .map(|(node, _)| EidPattern::AnyService(*node))
                    .chain(
                        routes
                            .by_eid
                            .iter()
                            .filter(|(_, route)| **route == index)
                            .map(|(eid, _)| EidPattern::Exact(*eid)),
                    )
                    .collect();
                final_destinations.sort_by_key(|pattern| pattern.to_string());

                OutductCapabilities {
                    uuid: index as u64,
                    name: entry.name.clone(),
                    convergence_layer: entry.outduct.convergence_layer(),
                    next_hop_node_id: entry.next_hop_node_id,
                    max_bundles_in_pipeline: entry.outduct.pipeline_capacity(),
                    max_sum_bundle_bytes_in_pipeline: entry.max_sum_bundle_bytes_in_pipeline,
                    final_destinations,
                }
            })
            .collect()
    }

    /// Stops every outduct and waits for all of them.
    pub async fn stop_all(&self) {
        let outducts = self.outducts();
        debug!(count = outducts.len(), "Stopping outducts");

        join_all(outducts.iter().map(|outduct| outduct.stop())).await;
    }

    pub fn len(&self) -> usize {
        self.routes.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn outducts(&self) -> Vec<Arc<dyn Outduct>> {
        self.routes.lock().entries.iter().map(|entry| Arc::clone(&entry.outduct)).collect()
    }
}

/// Builds the outduct described by `config`.
fn build(config: &OutductConfig, local_node_id: u64) -> Result<Arc<dyn Outduct>, RegistryError> {
    let layer: ConvergenceLayer = config.convergence_layer.parse()?;

    let needs_remote = !matches!(layer, ConvergenceLayer::LocalStream);
    if needs_remote && (config.remote_hostname.is_empty() || config.remote_port == 0) {
        return Err(RegistryError::MissingEndpoint(config.name.clone()));
    }
    if !needs_remote && config.local_socket_path.as_os_str().is_empty() {
        return Err(RegistryError::MissingEndpoint(config.name.clone()));
    }

    let outduct: Arc<dyn Outduct> = match layer {
        ConvergenceLayer::TcpclV3 => Arc::new(TcpclOutduct::new(
            TcpclOptions::from(config).with_local_node_id(local_node_id),
        )),
        ConvergenceLayer::Stcp => Arc::new(StcpOutduct::new(StcpOptions::from(config))),
        ConvergenceLayer::Udp => Arc::new(UdpOutduct::new(UdpOptions::from(config))),
        ConvergenceLayer::LocalStream => {
            Arc::new(LocalStreamOutduct::new(LocalStreamOptions::from(config)))
        }
    };

    Ok(outduct)
}
