use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use sluice_core::{Message, OutboundMessage};
use sluice_pipeline::chain::Next;
use sluice_pipeline::error::Result;
use sluice_pipeline::{Sink, Stage};

use crate::engine::TranslationEngine;

/// Longest accepted language code for `/set_lang`.
pub const MAX_LANGUAGE_CODE_LEN: usize = 6;

/// Per-conversation language preferences, owned by the translator stage.
///
/// Conversations without an explicit preference speak the default
/// language. Plain `std::sync::Mutex` — lookups never cross an await.
pub struct LanguageMap {
    default_language: String,
    conversations: Mutex<HashMap<String, String>>,
}

impl LanguageMap {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, id: &str, language: &str) {
        self.conversations
            .lock()
            .unwrap()
            .insert(id.to_string(), language.to_string());
    }

    pub fn get(&self, id: &str) -> String {
        self.conversations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.default_language.clone())
    }
}

/// Stage translating between each conversation's language and the language
/// the agent speaks. Consumes both directions.
///
/// Inbound, `/`-prefixed messages are treated as commands: `/set_lang` is
/// handled here, anything else is forwarded untouched for downstream
/// handling.
pub struct TranslateStage {
    bot_language: String,
    languages: LanguageMap,
    engine: Arc<dyn TranslationEngine>,
    /// Per-language confirmation texts for `/set_lang`, deployment data
    /// like the normalizer's table. Languages without an entry change
    /// silently.
    confirmations: HashMap<String, String>,
    responder: Option<Arc<dyn Sink>>,
}

impl TranslateStage {
    pub fn new(bot_language: impl Into<String>, engine: Arc<dyn TranslationEngine>) -> Self {
        let bot_language = bot_language.into();
        Self {
            languages: LanguageMap::new(bot_language.clone()),
            bot_language,
            engine,
            confirmations: HashMap::new(),
            responder: None,
        }
    }

    /// Acknowledge successful `/set_lang` commands by sending the new
    /// language's confirmation text back through `responder`.
    pub fn with_confirmations(
        mut self,
        confirmations: HashMap<String, String>,
        responder: Arc<dyn Sink>,
    ) -> Self {
        self.confirmations = confirmations;
        self.responder = Some(responder);
        self
    }

    /// Record a conversation's language preference, returning whether it
    /// was applied. Over-long codes are rejected — logged, not propagated,
    /// matching the command path they arrive through.
    pub fn set_language(&self, id: &str, language: &str) -> bool {
        if language.len() > MAX_LANGUAGE_CODE_LEN {
            error!(conversation = %id, language, "language code too long, ignoring");
            return false;
        }
        info!(conversation = %id, language, "conversation language set");
        self.languages.set(id, language);
        true
    }

    /// Send the conversation its change confirmation, when a responder and
    /// a text for the language are both configured.
    async fn confirm(&self, id: &str, language: &str) -> Result<()> {
        let (Some(responder), Some(text)) = (&self.responder, self.confirmations.get(language))
        else {
            return Ok(());
        };
        responder
            .deliver_outbound(id.to_string(), OutboundMessage::text(text.clone()))
            .await
    }

    /// Translate `text` for conversation `id`. Returns the conversation's
    /// language along with the (possibly untouched) text.
    async fn translate(&self, id: &str, text: &str, inbound: bool) -> Result<(String, String)> {
        let user_language = self.languages.get(id);
        if user_language == self.bot_language {
            return Ok((user_language, text.to_string()));
        }

        let (from, to) = if inbound {
            (user_language.as_str(), self.bot_language.as_str())
        } else {
            (self.bot_language.as_str(), user_language.as_str())
        };
        let translated = self.engine.translate(text.trim(), from, to).await?;
        Ok((user_language.clone(), translated))
    }

    async fn command(&self, msg: Message, next: Next) -> Result<()> {
        let mut parts = msg.text.split_whitespace();
        match parts.next() {
            Some("/set_lang") => {
                match parts.next() {
                    Some(language) => {
                        if self.set_language(&msg.sender_id, language) {
                            self.confirm(&msg.sender_id, language).await?;
                        }
                    }
                    None => error!(sender = %msg.sender_id, "no language passed to /set_lang"),
                }
                // Command consumed; nothing to forward.
                Ok(())
            }
            // Commands we do not own go forward for downstream handling.
            _ => next.forward(msg).await,
        }
    }
}

#[async_trait]
impl Stage for TranslateStage {
    fn name(&self) -> &str {
        "translate"
    }

    async fn process_inbound(&self, mut msg: Message, next: Next) -> Result<()> {
        debug!(sender = %msg.sender_id, "translator received inbound message");

        if msg.text.starts_with('/') {
            return self.command(msg, next).await;
        }

        let (language, text) = self.translate(&msg.sender_id, &msg.text, true).await?;
        msg.metadata.insert("lang".to_string(), Value::String(language));
        msg.text = text;
        next.forward(msg).await
    }

    async fn process_outbound(
        &self,
        recipient_id: String,
        mut msg: OutboundMessage,
        next: Next,
    ) -> Result<()> {
        debug!(recipient = %recipient_id, "translator received outbound message");

        let (_, text) = self.translate(&recipient_id, &msg.text, false).await?;
        msg.text = text;

        for button in &mut msg.buttons {
            let (_, title) = self.translate(&recipient_id, &button.title, false).await?;
            button.title = title;
        }

        next.forward_outbound(recipient_id, msg).await
    }
}
