//! Ben-Or node state machine
//!
//! A node consumes one [`Message`] at a time and answers with at most one
//! message to broadcast. The quorum check and the choice of that message
//! happen under a single lock, so a quorum-crossing event is acted on once.

use crate::consensus::coin::CoinSource;
use crate::consensus::ledger::{Recorded, RoundLedger, Tally};
use crate::consensus::types::{Message, NodeSnapshot, Phase, PeerId, PeerStatus, Value};
use crate::error::NodeError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Last round after which a node running with `3F > N` stops proposing.
pub const DEFAULT_ROUND_BUDGET: u64 = 10;

/// Cluster-wide protocol constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// N
    pub total_nodes: usize,
    /// F
    pub max_faulty: usize,
    pub round_budget: u64,
}

impl ProtocolParams {
    pub fn new(total_nodes: usize, max_faulty: usize) -> Self {
        ProtocolParams {
            total_nodes,
            max_faulty,
            round_budget: DEFAULT_ROUND_BUDGET,
        }
    }

    pub fn with_round_budget(mut self, round_budget: u64) -> Self {
        self.round_budget = round_budget;
        self
    }

    /// N - F
    pub fn quorum(&self) -> usize {
        self.total_nodes.saturating_sub(self.max_faulty)
    }

    /// Whether `3F <= N`, the bound under which deciding is attempted at all.
    pub fn tolerates_faults(&self) -> bool {
        3 * self.max_faulty <= self.total_nodes
    }

    /// F + 1
    pub fn decide_threshold(&self) -> usize {
        self.max_faulty + 1
    }

    /// `count > N / 2`
    pub fn is_majority(&self, count: usize) -> bool {
        2 * count > self.total_nodes
    }
}

/// `round + 1`, or `None` at the top of the round space.
fn following_round(peer: PeerId, round: u64) -> Option<u64> {
    let next = round.checked_add(1);
    if next.is_none() {
        warn!(peer, round, "vote quorum on the last representable round, no transition");
    }
    next
}

struct NodeInner {
    killed: bool,
    value: Option<Value>,
    round: Option<u64>,
    decided: Option<bool>,
    ledger: RoundLedger,
    coin: Box<dyn CoinSource>,
}

impl NodeInner {
    fn on_propose_quorum(&mut self, params: &ProtocolParams, round: u64, tally: Tally) -> Message {
        let chosen = if params.is_majority(tally.zeros) {
            Value::Zero
        } else if params.is_majority(tally.ones) {
            Value::One
        } else {
            self.coin.flip()
        };
        Message::vote(round, chosen)
    }

    fn on_vote_quorum(
        &mut self,
        peer: PeerId,
        params: &ProtocolParams,
        round: u64,
        tally: Tally,
    ) -> Option<Message> {
        if let Some(current) = self.round {
            if round < current {
                debug!(peer, round, current, "vote quorum for a round already left behind");
                return None;
            }
        }

        if !params.tolerates_faults() {
            let value = if tally.ones > tally.zeros {
                Value::One
            } else {
                Value::Zero
            };
            let next_round = following_round(peer, round)?;
            self.advance(next_round, value);
            if round <= params.round_budget {
                return Some(Message::propose(next_round, value));
            }
            warn!(
                peer,
                round,
                budget = params.round_budget,
                "round budget exhausted with 3F > N, no decision possible"
            );
            return None;
        }

        let threshold = params.decide_threshold();
        if tally.zeros >= threshold {
            self.decide(peer, round, Value::Zero);
            return None;
        }
        if tally.ones >= threshold {
            self.decide(peer, round, Value::One);
            return None;
        }

        let next_round = following_round(peer, round)?;
        let next = if tally.total() >= params.quorum() {
            match tally.strict_majority() {
                Some(value) => value,
                None => self.coin.flip(),
            }
        } else {
            self.coin.flip()
        };
        self.advance(next_round, next);
        Some(Message::propose(next_round, next))
    }

    fn advance(&mut self, round: u64, value: Value) {
        self.value = Some(value);
        self.round = Some(round);
        self.decided = Some(false);
    }

    fn decide(&mut self, peer: PeerId, round: u64, value: Value) {
        self.value = Some(value);
        self.decided = Some(true);
        if self.round.is_none() {
            self.round = Some(round);
        }
        info!(peer, round, %value, "decided");
    }
}

/// One peer's consensus state machine.
pub struct ConsensusNode {
    id: PeerId,
    params: ProtocolParams,
    faulty: bool,
    inner: Mutex<NodeInner>,
}

impl ConsensusNode {
    pub fn new(id: PeerId, params: ProtocolParams, faulty: bool, coin: Box<dyn CoinSource>) -> Self {
        ConsensusNode {
            id,
            params,
            faulty,
            inner: Mutex::new(NodeInner {
                killed: false,
                value: None,
                round: None,
                decided: None,
                ledger: RoundLedger::new(params.quorum()),
                coin,
            }),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn is_faulty(&self) -> bool {
        self.faulty
    }

    /// Enters round 1 and returns the PROPOSE to broadcast.
    ///
    /// A node that already has a round (started, or pulled along by its
    /// peers' votes) returns `Ok(None)`.
    pub fn start(&self, initial_value: Value) -> Result<Option<Message>, NodeError> {
        if self.faulty {
            return Err(NodeError::Faulty);
        }
        let mut inner = self.inner.lock();
        if inner.killed {
            return Err(NodeError::Killed);
        }
        if inner.round.is_some() {
            debug!(peer = self.id, "start ignored, node already running");
            return Ok(None);
        }

        inner.advance(1, initial_value);
        info!(peer = self.id, value = %initial_value, "starting consensus");
        Ok(Some(Message::propose(1, initial_value)))
    }

    /// Kills the node. Idempotent; a transition already holding the lock
    /// finishes first.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.killed {
            inner.killed = true;
            info!(peer = self.id, "stopped");
        }
    }

    /// Applies one inbound message. Returns the message to broadcast when
    /// this delivery completed a quorum.
    pub fn on_message(&self, msg: &Message) -> Result<Option<Message>, NodeError> {
        if self.faulty {
            return Err(NodeError::Faulty);
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.killed {
            return Err(NodeError::Killed);
        }

        let tally = match inner.ledger.record(msg.round, msg.phase, msg.value) {
            Recorded::QuorumReached(tally) => tally,
            Recorded::Stale => {
                debug!(peer = self.id, round = msg.round, phase = %msg.phase, "dropped message for pruned round");
                return Ok(None);
            }
            Recorded::Pending | Recorded::AlreadyResolved => return Ok(None),
        };

        if inner.decided == Some(true) {
            return Ok(None);
        }

        debug!(
            peer = self.id,
            round = msg.round,
            phase = %msg.phase,
            zeros = tally.zeros,
            ones = tally.ones,
            "quorum reached"
        );

        let outgoing = match msg.phase {
            Phase::Propose => Some(inner.on_propose_quorum(&self.params, msg.round, tally)),
            Phase::Vote => inner.on_vote_quorum(self.id, &self.params, msg.round, tally),
        };

        if let Some(current) = inner.round {
            inner.ledger.prune_resolved(current);
        }
        Ok(outgoing)
    }

    pub fn state(&self) -> NodeSnapshot {
        let inner = self.inner.lock();
        if self.faulty {
            return NodeSnapshot {
                killed: inner.killed,
                ..NodeSnapshot::default()
            };
        }
        NodeSnapshot {
            value: inner.value,
            round: inner.round,
            decided: inner.decided,
            killed: inner.killed,
        }
    }

    /// Faulty and stopped nodes both answer probes with the fault indicator.
    pub fn status(&self) -> PeerStatus {
        if self.faulty || self.inner.lock().killed {
            PeerStatus::Faulty
        } else {
            PeerStatus::Live
        }
    }

    /// Values recorded so far for a round/phase.
    pub fn received(&self, round: u64, phase: Phase) -> Vec<Value> {
        self.inner.lock().ledger.values(round, phase).to_vec()
    }

    pub fn stale_dropped(&self) -> u64 {
        self.inner.lock().ledger.stale_dropped()
    }
}

impl std::fmt::Debug for ConsensusNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusNode")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("faulty", &self.faulty)
            .field("state", &self.state())
            .finish()
    }
}
