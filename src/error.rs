//! Error types

use crate::consensus::PeerId;
use thiserror::Error;

/// Fault indicator returned by a peer that will not run the protocol.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    #[error("peer is faulty")]
    Faulty,

    #[error("peer has been stopped")]
    Killed,
}

/// Why a single delivery failed. Never fatal to the sender.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no peer with id {0}")]
    UnknownPeer(PeerId),

    #[error("http error talking to peer {peer}: {source}")]
    Http {
        peer: PeerId,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {peer} rejected the request with status {status}")]
    Rejected { peer: PeerId, status: u16 },

    #[error("inbox of peer {0} is closed")]
    Closed(PeerId),

    #[error("peer {peer} has no port above base port {base_port}")]
    PortOutOfRange { peer: PeerId, base_port: u16 },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("consensus not observed within {0:?}")]
    Timeout(std::time::Duration),

    #[error("polling cancelled")]
    Cancelled,

    #[error(transparent)]
    Peer(#[from] TransportError),
}
