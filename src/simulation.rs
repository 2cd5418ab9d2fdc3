//! Deterministic single-threaded cluster.
//!
//! All in-flight messages sit in one pool; each step a seeded RNG picks the
//! next one to deliver. Same seed, same interleaving, same outcome.

use crate::consensus::coin::{seeded_coin, CoinSource};
use crate::consensus::{ConsensusNode, Message, NodeSnapshot, PeerId, ProtocolParams, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// A message some node emitted, with the evidence it had at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub from: PeerId,
    pub message: Message,
    /// Entries the sender held for the round/phase of the delivery that
    /// triggered this message. `None` for the round-1 proposal from `start`.
    pub support: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub deliveries: usize,
    /// Deliveries refused by faulty or stopped peers.
    pub refused: usize,
    /// True when the run ended because nothing was left in flight.
    pub quiescent: bool,
    pub snapshots: Vec<NodeSnapshot>,
}

impl SimulationReport {
    /// Decided values of every peer that decided.
    pub fn decided_values(&self) -> Vec<Value> {
        self.snapshots
            .iter()
            .filter(|s| s.is_decided())
            .filter_map(|s| s.value)
            .collect()
    }

    pub fn agreement(&self) -> bool {
        self.decided_values().windows(2).all(|w| w[0] == w[1])
    }
}

pub struct Simulation {
    nodes: Vec<ConsensusNode>,
    initial_values: Vec<Value>,
    in_flight: Vec<(PeerId, Message)>,
    rng: ChaCha8Rng,
    sent: Vec<SentMessage>,
    deliveries: usize,
    refused: usize,
}

impl Simulation {
    /// Peer `i` starts with `initial_values[i]` and flips a coin seeded from
    /// `seed` and `i`.
    pub fn new(params: ProtocolParams, initial_values: Vec<Value>, faulty: &[PeerId], seed: u64) -> Self {
        Self::with_coins(params, initial_values, faulty, seed, |id| seeded_coin(seed, id))
    }

    pub fn with_coins(
        params: ProtocolParams,
        initial_values: Vec<Value>,
        faulty: &[PeerId],
        seed: u64,
        mut coin: impl FnMut(PeerId) -> Box<dyn CoinSource>,
    ) -> Self {
        let nodes = (0..initial_values.len())
            .map(|id| ConsensusNode::new(id, params, faulty.contains(&id), coin(id)))
            .collect();
        Simulation {
            nodes,
            initial_values,
            in_flight: Vec::new(),
            // keep delivery order independent from the coin streams
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(0x5EED_0000)),
            sent: Vec::new(),
            deliveries: 0,
            refused: 0,
        }
    }

    pub fn node(&self, id: PeerId) -> &ConsensusNode {
        &self.nodes[id]
    }

    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Starts every peer in id order. Faulty peers refuse.
    pub fn start_all(&mut self) {
        for id in 0..self.nodes.len() {
            self.start(id);
        }
    }

    pub fn start(&mut self, id: PeerId) {
        if let Ok(Some(proposal)) = self.nodes[id].start(self.initial_values[id]) {
            self.emit(id, proposal, None);
        }
    }

    pub fn stop(&mut self, id: PeerId) {
        self.nodes[id].stop();
    }

    fn emit(&mut self, from: PeerId, message: Message, support: Option<usize>) {
        self.sent.push(SentMessage {
            from,
            message,
            support,
        });
        for target in 0..self.nodes.len() {
            self.in_flight.push((target, message));
        }
    }

    /// Delivers one randomly chosen in-flight message. Returns false when
    /// nothing is in flight.
    pub fn step(&mut self) -> bool {
        if self.in_flight.is_empty() {
            return false;
        }
        let pick = self.rng.gen_range(0..self.in_flight.len());
        let (target, message) = self.in_flight.swap_remove(pick);
        self.deliveries += 1;

        // the triggering slot may be pruned during the transition, count first
        let held = self.nodes[target].received(message.round, message.phase).len();
        match self.nodes[target].on_message(&message) {
            Ok(Some(outgoing)) => self.emit(target, outgoing, Some(held + 1)),
            Ok(None) => {}
            Err(err) => {
                debug!(peer = target, %err, "delivery refused");
                self.refused += 1;
            }
        }
        true
    }

    /// Steps until nothing is in flight or `max_deliveries` is hit.
    pub fn run(&mut self, max_deliveries: usize) -> SimulationReport {
        let mut budget = max_deliveries;
        while budget > 0 && self.step() {
            budget -= 1;
        }
        self.report()
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            deliveries: self.deliveries,
            refused: self.refused,
            quiescent: self.in_flight.is_empty(),
            snapshots: self.nodes.iter().map(|n| n.state()).collect(),
        }
    }
}
