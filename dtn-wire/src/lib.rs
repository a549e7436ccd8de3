pub mod encap;
pub mod sdnv;
pub mod stcp;
pub mod tcpcl;
