use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use sluice_core::{Direction, Message, OutboundMessage, RawEvent};

use crate::chain::{Chain, Sink};
use crate::error::{PipelineError, Result};
use crate::stage::Stage;

/// Builds a canonical [`Message`] out of a raw transport event.
///
/// Supplied by the transport adapter, which knows what its events look
/// like. Must fail with [`PipelineError::MissingField`] when the event
/// lacks the identifier the deployment addresses conversations by.
#[async_trait]
pub trait MessageFactory: Send + Sync {
    async fn create_message(&self, event: RawEvent) -> Result<Message>;
}

/// Stock factory for transports whose events already carry a sender id.
pub struct CanonicalFactory;

#[async_trait]
impl MessageFactory for CanonicalFactory {
    async fn create_message(&self, event: RawEvent) -> Result<Message> {
        let sender_id = event
            .sender_id
            .ok_or(PipelineError::MissingField { field: "sender_id" })?;
        let mut msg = Message::new(sender_id, event.text);
        msg.metadata = event.metadata;
        Ok(msg)
    }
}

/// Entry point wiring a transport adapter to a processing chain.
///
/// Configured once with an ordered stage list, a terminal sink and a
/// direction; the chain itself is assembled lazily on the first event and
/// reused for every one after. Assembly goes through a [`OnceCell`], so
/// concurrent first events observe exactly one fully linked chain — never
/// a partial or double build.
pub struct Connector {
    stages: Vec<Arc<dyn Stage>>,
    sink: Arc<dyn Sink>,
    direction: Direction,
    factory: Arc<dyn MessageFactory>,
    chain: OnceCell<Arc<Chain>>,
}

impl Connector {
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        sink: Arc<dyn Sink>,
        direction: Direction,
        factory: Arc<dyn MessageFactory>,
    ) -> Self {
        Self {
            stages,
            sink,
            direction,
            factory,
            chain: OnceCell::new(),
        }
    }

    /// Handle one inbound transport event.
    ///
    /// Events the factory rejects for a missing required field are dropped
    /// with a warning — nothing propagates and nothing is forwarded. Sink
    /// and stage errors do propagate; retrying is the caller's business.
    pub async fn handle(&self, event: RawEvent) -> Result<()> {
        let chain = self.chain().await;

        let msg = match self.factory.create_message(event).await {
            Ok(msg) => msg,
            Err(PipelineError::MissingField { field }) => {
                warn!(field, "dropping event missing a required field");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!(sender = %msg.sender_id, "event accepted, starting chain");
        chain.process(msg).await
    }

    /// Handle one outbound payload from the agent.
    pub async fn handle_outbound(&self, recipient_id: String, msg: OutboundMessage) -> Result<()> {
        let chain = self.chain().await;
        chain.process_outbound(recipient_id, msg).await
    }

    async fn chain(&self) -> Arc<Chain> {
        self.chain
            .get_or_init(|| async {
                info!(
                    direction = ?self.direction,
                    stages = self.stages.len(),
                    "assembling processing chain"
                );
                Chain::new(self.stages.clone(), Arc::clone(&self.sink), self.direction)
            })
            .await
            .clone()
    }
}
