//! Cluster-wide control: start/stop every peer and watch for consensus

use crate::consensus::{NodeSnapshot, PeerId, PeerStatus, Value};
use crate::error::{OrchestratorError, TransportError};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-peer lifecycle and introspection calls.
#[async_trait]
pub trait PeerControl: Send + Sync {
    fn peer_count(&self) -> usize;

    async fn probe_status(&self, peer: PeerId) -> Result<PeerStatus, TransportError>;

    /// A faulty or stopped peer answers with `TransportError::Rejected`.
    async fn start(&self, peer: PeerId) -> Result<(), TransportError>;

    async fn stop(&self, peer: PeerId) -> Result<(), TransportError>;

    async fn get_state(&self, peer: PeerId) -> Result<NodeSnapshot, TransportError>;
}

/// Which peers must report `decided == true` before consensus counts as
/// observed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// Peers whose status probe answers "faulty" are left out.
    #[default]
    ExcludeFaulty,
    /// Every peer counts; a faulty peer never decides, so this only
    /// succeeds in a cluster without faulty peers.
    RequireAll,
}

/// What one poll saw of a peer. `None` means the call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerObservation {
    pub id: PeerId,
    pub status: Option<PeerStatus>,
    pub state: Option<NodeSnapshot>,
}

impl PeerObservation {
    fn counts_under(&self, policy: DecisionPolicy) -> bool {
        match policy {
            DecisionPolicy::RequireAll => true,
            DecisionPolicy::ExcludeFaulty => self.status != Some(PeerStatus::Faulty),
        }
    }

    fn is_decided(&self) -> bool {
        self.state.map(|s| s.is_decided()).unwrap_or(false)
    }
}

/// Final picture once every counted peer decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusOutcome {
    pub counted: Vec<PeerId>,
    /// The common decision, `None` when counted peers disagree.
    pub value: Option<Value>,
    pub observations: Vec<PeerObservation>,
    pub polls: u32,
}

impl ConsensusOutcome {
    pub fn agreed(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<PeerId>,
    pub rejected: Vec<PeerId>,
}

pub struct Orchestrator {
    control: Arc<dyn PeerControl>,
    policy: DecisionPolicy,
}

impl Orchestrator {
    pub fn new(control: Arc<dyn PeerControl>) -> Self {
        Orchestrator {
            control,
            policy: DecisionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DecisionPolicy {
        self.policy
    }

    /// Starts peers one by one. Rejections are expected from faulty peers.
    pub async fn start_all(&self) -> StartReport {
        let mut report = StartReport::default();
        for peer in 0..self.control.peer_count() {
            match self.control.start(peer).await {
                Ok(()) => report.started.push(peer),
                Err(err) => {
                    debug!(peer, %err, "start rejected");
                    report.rejected.push(peer);
                }
            }
        }
        info!(
            started = report.started.len(),
            rejected = report.rejected.len(),
            "start issued to all peers"
        );
        report
    }

    pub async fn stop_all(&self) {
        for peer in 0..self.control.peer_count() {
            if let Err(err) = self.control.stop(peer).await {
                warn!(peer, %err, "stop failed");
            }
        }
        info!("stop issued to all peers");
    }

    /// Probes status and state of every peer concurrently.
    pub async fn observe(&self) -> Vec<PeerObservation> {
        let polls = (0..self.control.peer_count()).map(|id| {
            let control = Arc::clone(&self.control);
            async move {
                let status = control.probe_status(id).await.ok();
                let state = control.get_state(id).await.ok();
                PeerObservation { id, status, state }
            }
        });
        join_all(polls).await
    }

    pub async fn peer_state(&self, peer: PeerId) -> Result<NodeSnapshot, OrchestratorError> {
        Ok(self.control.get_state(peer).await?)
    }

    /// True once every peer counted under the policy reports `decided`.
    pub async fn poll_decided(&self) -> bool {
        all_decided(&self.observe().await, self.policy)
    }

    /// Waits until every peer answers a status probe, live or faulty.
    pub async fn wait_until_live(
        &self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let probes = (0..self.control.peer_count()).map(|id| {
                let control = Arc::clone(&self.control);
                async move { control.probe_status(id).await.is_ok() }
            });
            let answered = timeout_at(deadline, join_all(probes))
                .await
                .map_err(|_| OrchestratorError::Timeout(timeout))?;
            if answered.into_iter().all(|ok| ok) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::Timeout(timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Polls every `poll_interval` until consensus is observed, the timeout
    /// elapses or `cancel` fires.
    pub async fn wait_for_consensus(
        &self,
        poll_interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ConsensusOutcome, OrchestratorError> {
        let deadline = Instant::now() + timeout;
        let expired = sleep_until(deadline);
        tokio::pin!(expired);
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = &mut expired => return Err(OrchestratorError::Timeout(timeout)),
                _ = ticker.tick() => {}
            }

            polls += 1;
            // a hung peer must not hold up cancellation or the deadline
            let observations = tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = &mut expired => return Err(OrchestratorError::Timeout(timeout)),
                observations = self.observe() => observations,
            };
            if all_decided(&observations, self.policy) {
                let outcome = summarize(observations, self.policy, polls);
                match outcome.value {
                    Some(value) => info!(%value, polls, "consensus observed"),
                    None => warn!(polls, "all counted peers decided but disagree"),
                }
                return Ok(outcome);
            }

            if Instant::now() >= deadline {
                return Err(OrchestratorError::Timeout(timeout));
            }
        }
    }
}

fn all_decided(observations: &[PeerObservation], policy: DecisionPolicy) -> bool {
    let mut counted = observations.iter().filter(|o| o.counts_under(policy)).peekable();
    counted.peek().is_some() && counted.all(|o| o.is_decided())
}

fn summarize(
    observations: Vec<PeerObservation>,
    policy: DecisionPolicy,
    polls: u32,
) -> ConsensusOutcome {
    let counted: Vec<PeerId> = observations
        .iter()
        .filter(|o| o.counts_under(policy))
        .map(|o| o.id)
        .collect();
    let mut values = observations
        .iter()
        .filter(|o| o.counts_under(policy))
        .filter_map(|o| o.state.and_then(|s| s.value));
    let value = match values.next() {
        Some(first) if values.all(|v| v == first) => Some(first),
        _ => None,
    };

    ConsensusOutcome {
        counted,
        value,
        observations,
        polls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(id: PeerId, status: PeerStatus, decided: Option<bool>, value: Option<Value>) -> PeerObservation {
        PeerObservation {
            id,
            status: Some(status),
            state: Some(NodeSnapshot {
                value,
                round: Some(1),
                decided,
                killed: false,
            }),
        }
    }

    #[test]
    fn test_exclude_faulty_ignores_null_state() {
        let observations = vec![
            observed(0, PeerStatus::Live, Some(true), Some(Value::One)),
            observed(1, PeerStatus::Live, Some(true), Some(Value::One)),
            observed(2, PeerStatus::Faulty, None, None),
        ];

        assert!(all_decided(&observations, DecisionPolicy::ExcludeFaulty));
        assert!(!all_decided(&observations, DecisionPolicy::RequireAll));

        let outcome = summarize(observations, DecisionPolicy::ExcludeFaulty, 1);
        assert_eq!(outcome.counted, vec![0, 1]);
        assert_eq!(outcome.value, Some(Value::One));
        assert!(outcome.agreed());
    }

    #[test]
    fn test_unreachable_peer_is_not_decided() {
        let observations = vec![
            observed(0, PeerStatus::Live, Some(true), Some(Value::Zero)),
            PeerObservation {
                id: 1,
                status: None,
                state: None,
            },
        ];
        assert!(!all_decided(&observations, DecisionPolicy::ExcludeFaulty));
    }

    #[test]
    fn test_disagreement_is_reported() {
        let observations = vec![
            observed(0, PeerStatus::Live, Some(true), Some(Value::Zero)),
            observed(1, PeerStatus::Live, Some(true), Some(Value::One)),
        ];
        let outcome = summarize(observations, DecisionPolicy::RequireAll, 3);
        assert_eq!(outcome.value, None);
        assert!(!outcome.agreed());
    }

    #[test]
    fn test_all_faulty_is_never_decided() {
        let observations = vec![observed(0, PeerStatus::Faulty, None, None)];
        assert!(!all_decided(&observations, DecisionPolicy::ExcludeFaulty));
    }

    /// Answers nothing, ever.
    struct HungControl;

    #[async_trait]
    impl PeerControl for HungControl {
        fn peer_count(&self) -> usize {
            3
        }

        async fn probe_status(&self, _peer: PeerId) -> Result<PeerStatus, TransportError> {
            futures::future::pending().await
        }

        async fn start(&self, _peer: PeerId) -> Result<(), TransportError> {
            futures::future::pending().await
        }

        async fn stop(&self, _peer: PeerId) -> Result<(), TransportError> {
            futures::future::pending().await
        }

        async fn get_state(&self, _peer: PeerId) -> Result<NodeSnapshot, TransportError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_poll_still_times_out() {
        let orchestrator = Orchestrator::new(Arc::new(HungControl));
        let began = Instant::now();

        let result = orchestrator
            .wait_for_consensus(
                Duration::from_millis(10),
                Duration::from_millis(100),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
        assert!(began.elapsed() < Duration::from_secs(5));

        let result = orchestrator
            .wait_until_live(Duration::from_millis(10), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_hung_poll_can_be_cancelled() {
        let orchestrator = Orchestrator::new(Arc::new(HungControl));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = orchestrator
            .wait_for_consensus(Duration::from_millis(10), Duration::from_secs(60), cancel)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    }
}
