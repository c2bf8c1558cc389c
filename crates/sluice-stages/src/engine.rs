use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use sluice_pipeline::error::{PipelineError, Result};

/// A machine-translation backend usable by the translator stage.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Translate `text` from language `from` into language `to`.
    /// Languages are ISO codes as stored in the [`LanguageMap`](crate::translate::LanguageMap).
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String>;
}

/// Engine speaking the Apertium APy protocol (`POST` with `langpair`/`q`
/// form fields).
pub struct ApertiumEngine {
    base_url: String,
    client: reqwest::Client,
    /// Optional ISO-code aliases ("es" → "spa"); unmapped codes pass
    /// through unchanged.
    language_codes: HashMap<String, String>,
}

impl ApertiumEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            language_codes: HashMap::new(),
        }
    }

    pub fn with_language_codes(mut self, codes: HashMap<String, String>) -> Self {
        self.language_codes = codes;
        self
    }

    fn code<'a>(&'a self, lang: &'a str) -> &'a str {
        self.language_codes
            .get(lang)
            .map(String::as_str)
            .unwrap_or(lang)
    }
}

#[async_trait]
impl TranslationEngine for ApertiumEngine {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        let langpair = format!("{}|{}", self.code(from), self.code(to));

        let response = self
            .client
            .post(&self.base_url)
            .form(&[("langpair", langpair.as_str()), ("q", text)])
            .send()
            .await
            .map_err(engine_error)?;

        let body: ApertiumResponse = response.json().await.map_err(engine_error)?;
        if body.response_status != 200 {
            return Err(engine_error(format!(
                "Apertium API error: status {}",
                body.response_status
            )));
        }

        Ok(clean_translation(&body.response_data.translated_text))
    }
}

fn engine_error(reason: impl ToString) -> PipelineError {
    PipelineError::Stage {
        stage: "translate".to_string(),
        reason: reason.to_string(),
    }
}

/// Apertium marks words it could not translate with `*`; strip the markers.
fn clean_translation(text: &str) -> String {
    text.replace('*', "")
}

#[derive(Debug, Deserialize)]
struct ApertiumResponse {
    #[serde(rename = "responseStatus")]
    response_status: i64,
    #[serde(rename = "responseData")]
    response_data: ApertiumData,
}

#[derive(Debug, Deserialize)]
struct ApertiumData {
    #[serde(rename = "translatedText")]
    translated_text: String,
}
