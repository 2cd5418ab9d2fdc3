//! A node wired to a transport

use crate::consensus::node::ConsensusNode;
use crate::consensus::traits::Transport;
use crate::consensus::types::{Message, NodeSnapshot, PeerId, PeerStatus, Value};
use crate::error::{NodeError, TransportError};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(PeerId, TransportError)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// One peer: the state machine plus the means to reach everybody else.
pub struct ConsensusPeer {
    node: ConsensusNode,
    initial_value: Value,
    transport: Arc<dyn Transport>,
}

impl ConsensusPeer {
    pub fn new(node: ConsensusNode, initial_value: Value, transport: Arc<dyn Transport>) -> Self {
        ConsensusPeer {
            node,
            initial_value,
            transport,
        }
    }

    pub fn id(&self) -> PeerId {
        self.node.id()
    }

    pub fn node(&self) -> &ConsensusNode {
        &self.node
    }

    pub fn initial_value(&self) -> Value {
        self.initial_value
    }

    /// Starts round 1 with the configured initial value.
    pub fn start(&self) -> Result<Option<Message>, NodeError> {
        self.node.start(self.initial_value)
    }

    pub fn stop(&self) {
        self.node.stop()
    }

    /// Applies an inbound message, logging rejections.
    pub fn handle(&self, message: &Message) -> Result<Option<Message>, NodeError> {
        let result = self.node.on_message(message);
        if let Err(err) = &result {
            debug!(peer = self.id(), round = message.round, phase = %message.phase, %err, "message refused");
        }
        result
    }

    pub fn state(&self) -> NodeSnapshot {
        self.node.state()
    }

    pub fn status(&self) -> PeerStatus {
        self.node.status()
    }

    /// Sends `message` to all N peers, self included, in parallel.
    /// Completes once every attempt finished.
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        let targets = 0..self.transport.peer_count();
        let attempts = targets.map(|target| {
            let transport = Arc::clone(&self.transport);
            async move { (target, transport.deliver(target, message).await) }
        });

        let mut report = BroadcastReport::default();
        for (target, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(peer = self.id(), target, round = message.round, phase = %message.phase, %err, "delivery failed");
                    report.failed.push((target, err));
                }
            }
        }
        report
    }

    /// `start` followed by the broadcast it produced, if any.
    pub async fn start_and_broadcast(&self) -> Result<Option<BroadcastReport>, NodeError> {
        match self.start()? {
            Some(message) => Ok(Some(self.broadcast(message).await)),
            None => Ok(None),
        }
    }

    /// `handle` followed by the broadcast it produced, if any.
    pub async fn receive(&self, message: Message) -> Result<Option<BroadcastReport>, NodeError> {
        match self.handle(&message)? {
            Some(outgoing) => Ok(Some(self.broadcast(outgoing).await)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for ConsensusPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusPeer")
            .field("node", &self.node)
            .field("initial_value", &self.initial_value)
            .field("transport", &"dyn Transport")
            .finish()
    }
}
