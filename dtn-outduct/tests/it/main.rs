mod common;
mod local;
mod registry;
mod stcp;
mod tcpcl;
mod udp;
