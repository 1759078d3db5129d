//! Outbound Collaborator Contract (spec.md §4.7) — specified only at the
//! interface. Concrete AP delivery / AT Protocol record posting lives
//! outside this core; this trait is what the inbound pipeline hands
//! local-origin events to.

use nostr::Event;

use crate::error::Result;

/// Consumes a local kind 1/6/7/5 Nostr event and publishes it to one
/// foreign network, returning the foreign id it was published as so the
/// caller can record the dedup mapping. Implementations MUST insert the
/// `(foreign_id, nostr_id)` mapping into Persistence themselves on
/// success — that's the symmetric half of loop prevention spec.md §4.7
/// calls out: the foreign network later echoing this item back through
/// notifications must find it already mapped.
#[async_trait::async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<String>;
}
