//! Protocol value types shared by the node, the transports and the orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense peer index in `[0, N)`.
pub type PeerId = usize;

/// A binary consensus value. Serialised as the JSON integers `0` and `1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Value {
    Zero,
    One,
}

impl Value {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Value::One
        } else {
            Value::Zero
        }
    }
}

impl From<Value> for u8 {
    fn from(value: Value) -> Self {
        match value {
            Value::Zero => 0,
            Value::One => 1,
        }
    }
}

impl TryFrom<u8> for Value {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Value::Zero),
            1 => Ok(Value::One),
            other => Err(format!("value must be 0 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Which half of a round a message belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Propose,
    Vote,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Propose => write!(f, "PROPOSE"),
            Phase::Vote => write!(f, "VOTE"),
        }
    }
}

/// Protocol message. Carries no sender identity; only counts matter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub round: u64,
    pub value: Value,
    pub phase: Phase,
}

impl Message {
    pub fn propose(round: u64, value: Value) -> Self {
        Message {
            round,
            value,
            phase: Phase::Propose,
        }
    }

    pub fn vote(round: u64, value: Value) -> Self {
        Message {
            round,
            value,
            phase: Phase::Vote,
        }
    }
}

/// Externally visible node state, as returned by `getState`.
///
/// `None` fields mean "not started" for a healthy node, and are always `None`
/// for a faulty one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeSnapshot {
    pub value: Option<Value>,
    pub round: Option<u64>,
    pub decided: Option<bool>,
    pub killed: bool,
}

impl NodeSnapshot {
    pub fn is_decided(&self) -> bool {
        self.decided == Some(true)
    }
}

/// Answer to a status probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Live,
    Faulty,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Live => "live",
            PeerStatus::Faulty => "faulty",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::propose(3, Value::One);
        let json = serde_json::to_value(msg).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"round": 3, "value": 1, "phase": "PROPOSE"})
        );
    }

    #[test]
    fn test_value_rejects_non_binary() {
        let parsed: Result<Message, _> =
            serde_json::from_str(r#"{"round": 1, "value": 2, "phase": "VOTE"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_snapshot_nulls_before_start() {
        let json = serde_json::to_value(NodeSnapshot::default()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"value": null, "round": null, "decided": null, "killed": false})
        );
        assert!(!NodeSnapshot::default().is_decided());
    }
}
