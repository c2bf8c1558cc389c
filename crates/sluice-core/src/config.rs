use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Quiet window applied by the coalescer when no override is configured.
pub const DEFAULT_COALESCE_WINDOW_SECS: f64 = 3.0;

/// Top-level config (sluice.toml + SLUICE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Quiet window in seconds before a sender's batch is committed.
    /// Non-negative; 0 disables batching (every message is its own batch).
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_secs: f64,

    /// Language the agent speaks. Consumed by the translator stage.
    #[serde(default = "default_bot_language")]
    pub bot_language: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coalesce_window_secs: default_coalesce_window(),
            bot_language: default_bot_language(),
        }
    }
}

fn default_coalesce_window() -> f64 {
    DEFAULT_COALESCE_WINDOW_SECS
}
fn default_bot_language() -> String {
    "en".to_string()
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sluice/sluice.toml", home)
}

impl SluiceConfig {
    /// Load config from a TOML file with SLUICE_* env var overrides.
    ///
    /// Falls back to `~/.sluice/sluice.toml` when no path is given. A
    /// missing file is not an error — defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SluiceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SLUICE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// The coalescing window as a `Duration`, clamped to non-negative.
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_secs_f64(self.pipeline.coalesce_window_secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = SluiceConfig::default();
        assert_eq!(config.pipeline.coalesce_window_secs, 3.0);
        assert_eq!(config.pipeline.bot_language, "en");
        assert_eq!(config.coalesce_window(), Duration::from_secs(3));
    }

    #[test]
    fn toml_overrides_window() {
        let config: SluiceConfig = Figment::new()
            .merge(Toml::string("[pipeline]\ncoalesce_window_secs = 0.5"))
            .extract()
            .unwrap();
        assert_eq!(config.pipeline.coalesce_window_secs, 0.5);
        assert_eq!(config.coalesce_window(), Duration::from_millis(500));
        // untouched keys keep their defaults
        assert_eq!(config.pipeline.bot_language, "en");
    }

    #[test]
    fn negative_window_clamps_to_zero() {
        let config: SluiceConfig = Figment::new()
            .merge(Toml::string("[pipeline]\ncoalesce_window_secs = -1.0"))
            .extract()
            .unwrap();
        assert_eq!(config.coalesce_window(), Duration::ZERO);
    }
}
