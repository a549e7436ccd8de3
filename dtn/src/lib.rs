#![doc(issue_tracker_base_url = "https://github.com/dtn-rs/dtn-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Convergence-layer outducts for bundle transport.
//!
//! Re-exports the outduct bindings and registry together with the transports, wire codecs and
//! shared primitives they are built on.

pub use dtn_common::{Eid, EidError, EidPattern, PipelineQueue, TokenBucket};
pub use dtn_outduct::*;
pub use dtn_transport::{HostPort, Ipc, Tcp, Transport};
pub use dtn_wire::{encap, sdnv, stcp, tcpcl};
