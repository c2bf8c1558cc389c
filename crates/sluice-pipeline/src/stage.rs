use async_trait::async_trait;
use sluice_core::{Message, OutboundMessage};

use crate::chain::Next;
use crate::error::Result;

/// One link in a processing chain.
///
/// A stage transforms or inspects a message, then continues the chain by
/// calling [`Next::forward`] (or the outbound equivalent) with the possibly
/// mutated payload. A stage that returns without forwarding silently halts
/// the pipeline for that message — there is no detection at this layer, so
/// holding a message back (as the coalescer does) is a deliberate act, not
/// an accident the runtime will catch.
///
/// Stages are polymorphic over direction: the default method bodies forward
/// unchanged, so a concrete stage overrides only the direction(s) it
/// consumes.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier for this stage, used in logs.
    fn name(&self) -> &str;

    /// Consume an inbound message on its way to the agent.
    async fn process_inbound(&self, msg: Message, next: Next) -> Result<()> {
        next.forward(msg).await
    }

    /// Consume an outbound payload on its way back to the transport.
    async fn process_outbound(
        &self,
        recipient_id: String,
        msg: OutboundMessage,
        next: Next,
    ) -> Result<()> {
        next.forward_outbound(recipient_id, msg).await
    }
}
