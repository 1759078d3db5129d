//! Relay publisher contract (spec.md §1, §5): the core specifies that
//! publishing exposes a `publish(event)` operation with at-least-once
//! semantics; the WebSocket transport to Nostr relays is an external
//! collaborator.

use nostr::Event;

use crate::error::Result;

#[async_trait::async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Publish `event` to the configured relay set. At-least-once: a
    /// caller that sees `Ok` may assume the event reached at least one
    /// relay; retried sends on transient failure are the implementor's
    /// responsibility, not a correctness requirement the core imposes.
    async fn publish(&self, event: &Event) -> Result<()>;
}
