use async_trait::async_trait;
use tracing::debug;

use sluice_core::Message;
use sluice_pipeline::chain::Next;
use sluice_pipeline::error::Result;
use sluice_pipeline::Stage;

/// Inbound stage that trims, lowercases and rewrites message text through
/// an ordered replacement table.
///
/// The table is deployment data — accent folding, slang expansion and the
/// like belong in config, not in this crate. Replacements apply in the
/// order given, each over the result of the previous one.
pub struct NormalizeStage {
    replacements: Vec<(String, String)>,
}

impl NormalizeStage {
    pub fn new(replacements: Vec<(String, String)>) -> Self {
        Self { replacements }
    }

    fn normalize(&self, text: &str) -> String {
        let mut text = text.trim().to_lowercase();
        for (find, replace) in &self.replacements {
            text = text.replace(find.as_str(), replace.as_str());
        }
        text
    }
}

#[async_trait]
impl Stage for NormalizeStage {
    fn name(&self) -> &str {
        "normalize"
    }

    async fn process_inbound(&self, mut msg: Message, next: Next) -> Result<()> {
        debug!(sender = %msg.sender_id, "normalizing inbound text");
        msg.text = self.normalize(&msg.text);
        next.forward(msg).await
    }
}
