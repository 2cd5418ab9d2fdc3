//! Per-round vote bookkeeping

use crate::consensus::types::{Phase, Value};
use std::collections::BTreeMap;

/// Counts of each binary value among the entries of one round/phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub zeros: usize,
    pub ones: usize,
}

impl Tally {
    pub fn count(values: &[Value]) -> Self {
        values.iter().fold(Tally::default(), |mut tally, value| {
            match value {
                Value::Zero => tally.zeros += 1,
                Value::One => tally.ones += 1,
            }
            tally
        })
    }

    pub fn total(&self) -> usize {
        self.zeros + self.ones
    }

    /// Value with the strictly larger count, if any.
    pub fn strict_majority(&self) -> Option<Value> {
        if self.zeros > self.ones {
            Some(Value::Zero)
        } else if self.ones > self.zeros {
            Some(Value::One)
        } else {
            None
        }
    }
}

/// Outcome of recording one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Stored, quorum not reached yet.
    Pending,
    /// This entry made the slot reach quorum for the first time.
    QuorumReached(Tally),
    /// Stored after the slot's quorum already fired.
    AlreadyResolved,
    /// The round was pruned; the entry was dropped.
    Stale,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    values: Vec<Value>,
    resolved: bool,
}

#[derive(Debug, Clone, Default)]
struct RoundEntry {
    propose: Slot,
    vote: Slot,
}

impl RoundEntry {
    fn slot(&self, phase: Phase) -> &Slot {
        match phase {
            Phase::Propose => &self.propose,
            Phase::Vote => &self.vote,
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Slot {
        match phase {
            Phase::Propose => &mut self.propose,
            Phase::Vote => &mut self.vote,
        }
    }
}

/// Round number -> phase -> received values.
///
/// Each slot fires at most once, the first time its length reaches the
/// quorum. Rounds below `floor` were fully resolved and are gone; anything
/// that arrives for them is reported as [`Recorded::Stale`].
#[derive(Debug, Clone)]
pub struct RoundLedger {
    quorum: usize,
    rounds: BTreeMap<u64, RoundEntry>,
    floor: u64,
    stale_dropped: u64,
}

impl RoundLedger {
    pub fn new(quorum: usize) -> Self {
        RoundLedger {
            quorum,
            rounds: BTreeMap::new(),
            floor: 0,
            stale_dropped: 0,
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn record(&mut self, round: u64, phase: Phase, value: Value) -> Recorded {
        if round < self.floor {
            self.stale_dropped += 1;
            return Recorded::Stale;
        }

        let slot = self.rounds.entry(round).or_default().slot_mut(phase);
        slot.values.push(value);

        if slot.resolved {
            Recorded::AlreadyResolved
        } else if slot.values.len() >= self.quorum {
            slot.resolved = true;
            Recorded::QuorumReached(Tally::count(&slot.values))
        } else {
            Recorded::Pending
        }
    }

    /// Values received for a round/phase, in arrival order.
    pub fn values(&self, round: u64, phase: Phase) -> &[Value] {
        self.rounds
            .get(&round)
            .map(|entry| entry.slot(phase).values.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_quorum(&self, round: u64, phase: Phase) -> bool {
        self.rounds
            .get(&round)
            .map(|entry| entry.slot(phase).resolved)
            .unwrap_or(false)
    }

    /// Drops leading rounds below `current_round` whose two phases both fired,
    /// and rounds more than one behind whose VOTE quorum fired even though
    /// their PROPOSE quorum never did. Stops at the first round kept.
    ///
    /// A round whose VOTE quorum never fired is retained, so a node pulled
    /// forward by a later round's votes keeps the rounds it skipped.
    pub fn prune_resolved(&mut self, current_round: u64) -> usize {
        let mut pruned = 0;
        while let Some((&round, entry)) = self.rounds.first_key_value() {
            let settled = entry.propose.resolved && entry.vote.resolved;
            let overtaken = entry.vote.resolved && round.saturating_add(1) < current_round;
            if round >= current_round || !(settled || overtaken) {
                break;
            }
            self.rounds.remove(&round);
            self.floor = round + 1;
            pruned += 1;
        }
        pruned
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    pub fn retained_rounds(&self) -> usize {
        self.rounds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_fires_once() {
        let mut ledger = RoundLedger::new(3);

        assert_eq!(ledger.record(1, Phase::Propose, Value::One), Recorded::Pending);
        assert_eq!(ledger.record(1, Phase::Propose, Value::Zero), Recorded::Pending);
        assert_eq!(
            ledger.record(1, Phase::Propose, Value::One),
            Recorded::QuorumReached(Tally { zeros: 1, ones: 2 })
        );
        assert_eq!(
            ledger.record(1, Phase::Propose, Value::One),
            Recorded::AlreadyResolved
        );

        assert_eq!(ledger.values(1, Phase::Propose).len(), 4);
        assert!(ledger.has_quorum(1, Phase::Propose));
        assert!(!ledger.has_quorum(1, Phase::Vote));
    }

    #[test]
    fn test_phases_and_rounds_are_independent() {
        let mut ledger = RoundLedger::new(2);

        ledger.record(1, Phase::Propose, Value::Zero);
        ledger.record(1, Phase::Vote, Value::Zero);
        ledger.record(2, Phase::Propose, Value::Zero);

        assert_eq!(ledger.values(1, Phase::Propose), &[Value::Zero]);
        assert_eq!(ledger.values(1, Phase::Vote), &[Value::Zero]);
        assert_eq!(ledger.values(2, Phase::Propose), &[Value::Zero]);
        assert!(ledger.values(3, Phase::Vote).is_empty());
    }

    #[test]
    fn test_prune_keeps_unresolved_rounds() {
        let mut ledger = RoundLedger::new(1);

        ledger.record(1, Phase::Propose, Value::One);
        ledger.record(1, Phase::Vote, Value::One);
        // round 2 only has votes; its own PROPOSE quorum is still open
        ledger.record(2, Phase::Vote, Value::One);
        ledger.record(3, Phase::Propose, Value::One);

        assert_eq!(ledger.prune_resolved(3), 1);
        assert_eq!(ledger.floor(), 2);
        assert_eq!(ledger.retained_rounds(), 2);

        assert_eq!(ledger.record(1, Phase::Vote, Value::Zero), Recorded::Stale);
        assert_eq!(ledger.stale_dropped(), 1);
        assert!(matches!(
            ledger.record(2, Phase::Propose, Value::One),
            Recorded::QuorumReached(_)
        ));
    }

    #[test]
    fn test_prune_drops_overtaken_rounds() {
        let mut ledger = RoundLedger::new(1);

        // votes fired for 2, its proposals never did
        ledger.record(2, Phase::Vote, Value::One);
        ledger.record(3, Phase::Propose, Value::One);
        ledger.record(4, Phase::Propose, Value::Zero);

        assert_eq!(ledger.prune_resolved(3), 0);
        assert_eq!(ledger.prune_resolved(5), 1);
        assert_eq!(ledger.floor(), 3);
        assert_eq!(ledger.retained_rounds(), 2);
        assert_eq!(ledger.record(2, Phase::Propose, Value::One), Recorded::Stale);

        ledger.record(3, Phase::Vote, Value::One);
        ledger.record(4, Phase::Vote, Value::One);
        assert_eq!(ledger.prune_resolved(5), 2);
        assert_eq!(ledger.retained_rounds(), 0);
    }

    #[test]
    fn test_tally_majority() {
        let tally = Tally::count(&[Value::Zero, Value::One, Value::One]);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.strict_majority(), Some(Value::One));
        assert_eq!(Tally { zeros: 2, ones: 2 }.strict_majority(), None);
    }
}
