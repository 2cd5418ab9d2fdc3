//! Ben-Or randomized binary consensus
//!
//! The protocol core is transport-agnostic: a `ConsensusNode` consumes
//! messages and returns the one message it wants broadcast, if any. A
//! `ConsensusPeer` pairs a node with a `Transport` and fans that message out.
//!
//! ## Structure
//! - `types.rs` - Wire messages, values, phases and state snapshots
//! - `ledger.rs` - Per-round, per-phase message log with quorum detection
//! - `coin.rs` - Local coin sources (entropy, seeded, scripted)
//! - `node.rs` - Protocol state machine
//! - `traits.rs` - Transport trait definition
//! - `peer.rs` - Node plus transport, parallel broadcast
//! - `tests.rs` - Cluster-level tests

// Re-export public API
pub use ledger::{Recorded, RoundLedger, Tally};
pub use node::{ConsensusNode, ProtocolParams, DEFAULT_ROUND_BUDGET};
pub use peer::{BroadcastReport, ConsensusPeer};
pub use traits::Transport;
pub use types::{Message, NodeSnapshot, PeerId, PeerStatus, Phase, Value};

pub mod coin;
pub mod ledger;
pub mod node;
pub mod peer;


// Internal modules
mod traits;
mod types;
