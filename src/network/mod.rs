//! Peer-to-peer plumbing: the actix-web peer server, reqwest clients for
//! messages and lifecycle control, and an in-process channel cluster.

pub mod client;
pub mod memory;
pub mod server;

pub use client::{HttpPeerClient, HttpTransport, PeerDirectory};
pub use memory::{ChannelTransport, LocalCluster};
pub use server::{build_server, routes, start_server};
