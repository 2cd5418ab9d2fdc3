//! In-process cluster: every peer owns an unbounded channel inbox drained
//! by its own task, so each node handles one message at a time.

use crate::consensus::coin::{entropy_coin, seeded_coin};
use crate::consensus::{
    ConsensusNode, ConsensusPeer, Message, NodeSnapshot, PeerId, PeerStatus, ProtocolParams,
    Transport, Value,
};
use crate::error::TransportError;
use crate::orchestrator::PeerControl;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Transport that pushes messages straight into peers' inboxes.
pub struct ChannelTransport {
    inboxes: Vec<UnboundedSender<Message>>,
}

impl ChannelTransport {
    pub fn new(inboxes: Vec<UnboundedSender<Message>>) -> Self {
        ChannelTransport { inboxes }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, target: PeerId, message: Message) -> Result<(), TransportError> {
        self.inboxes
            .get(target)
            .ok_or(TransportError::UnknownPeer(target))?
            .send(message)
            .map_err(|_| TransportError::Closed(target))
    }

    fn peer_count(&self) -> usize {
        self.inboxes.len()
    }
}

/// N peers running inside the current tokio runtime.
pub struct LocalCluster {
    peers: Vec<Arc<ConsensusPeer>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Spawns one peer per entry of `initial_values`. Must be called from
    /// within a tokio runtime. With `seed` set, coin flips are reproducible
    /// per peer; delivery order still depends on the scheduler.
    pub fn spawn(
        params: ProtocolParams,
        initial_values: &[Value],
        faulty: &[PeerId],
        seed: Option<u64>,
    ) -> Self {
        let n = initial_values.len();
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..n).map(|_| unbounded_channel::<Message>()).unzip();
        let transport: Arc<dyn Transport> = Arc::new(ChannelTransport::new(senders));

        let mut peers = Vec::with_capacity(n);
        let mut tasks = Vec::with_capacity(n);
        for (id, rx) in receivers.into_iter().enumerate() {
            let coin = match seed {
                Some(seed) => seeded_coin(seed, id),
                None => entropy_coin(),
            };
            let node = ConsensusNode::new(id, params, faulty.contains(&id), coin);
            let peer = Arc::new(ConsensusPeer::new(
                node,
                initial_values[id],
                Arc::clone(&transport),
            ));
            tasks.push(tokio::spawn(drain_inbox(Arc::clone(&peer), rx)));
            peers.push(peer);
        }

        LocalCluster { peers, tasks }
    }

    pub fn peer(&self, id: PeerId) -> Option<&Arc<ConsensusPeer>> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> &[Arc<ConsensusPeer>] {
        &self.peers
    }

    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.peers.iter().map(|p| p.state()).collect()
    }

    /// Aborts every inbox task.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn lookup(&self, id: PeerId) -> Result<&Arc<ConsensusPeer>, TransportError> {
        self.peers.get(id).ok_or(TransportError::UnknownPeer(id))
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain_inbox(peer: Arc<ConsensusPeer>, mut inbox: UnboundedReceiver<Message>) {
    while let Some(message) = inbox.recv().await {
        // refusals are already logged by the peer
        let _ = peer.receive(message).await;
    }
    debug!(peer = peer.id(), "inbox closed");
}

#[async_trait]
impl PeerControl for LocalCluster {
    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn probe_status(&self, peer: PeerId) -> Result<PeerStatus, TransportError> {
        Ok(self.lookup(peer)?.status())
    }

    async fn start(&self, peer: PeerId) -> Result<(), TransportError> {
        self.lookup(peer)?
            .start_and_broadcast()
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Rejected { peer, status: 500 })
    }

    async fn stop(&self, peer: PeerId) -> Result<(), TransportError> {
        self.lookup(peer)?.stop();
        Ok(())
    }

    async fn get_state(&self, peer: PeerId) -> Result<NodeSnapshot, TransportError> {
        Ok(self.lookup(peer)?.state())
    }
}
