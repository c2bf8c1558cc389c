use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use sluice_core::{Direction, Message, OutboundMessage};

use crate::error::{PipelineError, Result};
use crate::stage::Stage;

/// Terminal consumer of a chain.
///
/// Inbound chains end at the agent handler, outbound chains at the transport
/// sender. Implementations live with the transport/agent collaborators, not
/// here. Delivery errors propagate to the caller of `handle`; the pipeline
/// never retries.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver a fully processed inbound message to the agent.
    async fn deliver(&self, msg: Message) -> Result<()>;

    /// Deliver a processed outbound payload back to the transport.
    async fn deliver_outbound(&self, recipient_id: String, msg: OutboundMessage) -> Result<()>;
}

/// A fully assembled, immutable stage sequence terminating in a [`Sink`].
///
/// Built exactly once (see [`Connector`](crate::connector::Connector)) and
/// safe to share across tasks without further locking: linkage is an index
/// into the owned stage sequence, never a mutable next-pointer.
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
    sink: Arc<dyn Sink>,
    direction: Direction,
}

impl Chain {
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        sink: Arc<dyn Sink>,
        direction: Direction,
    ) -> Arc<Self> {
        Arc::new(Self {
            stages,
            sink,
            direction,
        })
    }

    /// Direction this chain was assembled for.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of configured stages (the sink is not counted).
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run an inbound message through the chain, starting at the first
    /// stage. With no stages configured the message goes straight to the
    /// sink.
    pub async fn process(self: &Arc<Self>, msg: Message) -> Result<()> {
        if self.direction != Direction::Inbound {
            return Err(PipelineError::DirectionMismatch {
                built: self.direction,
                requested: Direction::Inbound,
            });
        }
        self.dispatch(0, msg).await
    }

    /// Run an outbound payload through the chain.
    pub async fn process_outbound(
        self: &Arc<Self>,
        recipient_id: String,
        msg: OutboundMessage,
    ) -> Result<()> {
        if self.direction != Direction::Outbound {
            return Err(PipelineError::DirectionMismatch {
                built: self.direction,
                requested: Direction::Outbound,
            });
        }
        self.dispatch_outbound(0, recipient_id, msg).await
    }

    /// Invoke the stage at `index`, or the sink once past the end.
    ///
    /// Boxed because the recursion through `Stage::process_inbound` is
    /// otherwise an infinitely sized future.
    fn dispatch(self: &Arc<Self>, index: usize, msg: Message) -> BoxFuture<'static, Result<()>> {
        let chain = Arc::clone(self);
        Box::pin(async move {
            match chain.stages.get(index) {
                Some(stage) => {
                    let next = Next {
                        chain: Arc::clone(&chain),
                        index: index + 1,
                    };
                    stage.process_inbound(msg, next).await
                }
                None => chain.sink.deliver(msg).await,
            }
        })
    }

    fn dispatch_outbound(
        self: &Arc<Self>,
        index: usize,
        recipient_id: String,
        msg: OutboundMessage,
    ) -> BoxFuture<'static, Result<()>> {
        let chain = Arc::clone(self);
        Box::pin(async move {
            match chain.stages.get(index) {
                Some(stage) => {
                    let next = Next {
                        chain: Arc::clone(&chain),
                        index: index + 1,
                    };
                    stage.process_outbound(recipient_id, msg, next).await
                }
                None => chain.sink.deliver_outbound(recipient_id, msg).await,
            }
        })
    }
}

/// Invocation handle a stage uses to continue the chain.
///
/// Cheap to clone; holding one (as the coalescer's timers do) keeps the
/// chain alive.
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    #[cfg(test)]
    pub(crate) fn at(chain: Arc<Chain>, index: usize) -> Self {
        Self { chain, index }
    }

    /// Hand the (possibly mutated) message to the following stage, or the
    /// sink when this was the last stage.
    pub async fn forward(self, msg: Message) -> Result<()> {
        self.chain.dispatch(self.index, msg).await
    }

    pub async fn forward_outbound(self, recipient_id: String, msg: OutboundMessage) -> Result<()> {
        self.chain
            .dispatch_outbound(self.index, recipient_id, msg)
            .await
    }
}
