//! Transport seam between a node and its peers

use crate::consensus::types::{Message, PeerId};
use crate::error::TransportError;
use async_trait::async_trait;

/// Delivers protocol messages to peers `0..peer_count()`.
///
/// Delivery is best-effort: an `Err` is reported to the caller, who logs it
/// and moves on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: PeerId, message: Message) -> Result<(), TransportError>;

    fn peer_count(&self) -> usize;
}
