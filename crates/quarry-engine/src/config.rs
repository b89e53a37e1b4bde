//! Engine configuration loaded from TOML.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! Example:
//! ```toml
//! max_tool_iterations = 5
//! turn_timeout_secs = 60
//! prescreen_model = "gpt-3.5-turbo"
//!
//! [rate_limit]
//! requests = 10
//! window_secs = 60
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use quarry_contracts::{
    agent::ProviderKind,
    error::{QuarryError, QuarryResult},
};
use quarry_policy::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model calls that may request tools before the forced final answer.
    pub max_tool_iterations: u32,
    /// Wall-clock budget for one turn, provider calls and tools included.
    pub turn_timeout_secs: u64,
    /// Most recent conversation messages sent as context.
    pub history_window: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Vendor and lightweight model used by the pre-screen classifier.
    pub prescreen_provider: ProviderKind,
    pub prescreen_model: String,
    /// The classifier must be more confident than this to skip the full model.
    pub prescreen_confidence_threshold: f64,
    pub rate_limit: RateLimitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            turn_timeout_secs: 60,
            history_window: 10,
            temperature: 0.3,
            max_tokens: 1500,
            prescreen_provider: ProviderKind::OpenAi,
            prescreen_model: "gpt-3.5-turbo".to_string(),
            prescreen_confidence_threshold: 0.7,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `QuarryError::ConfigError` if the TOML is malformed or a value
    /// is out of range.
    pub fn from_toml_str(s: &str) -> QuarryResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| QuarryError::ConfigError {
            reason: format!("failed to parse engine TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as engine configuration.
    pub fn from_file(path: &Path) -> QuarryResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| QuarryError::ConfigError {
            reason: format!("failed to read engine config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> QuarryResult<()> {
        if self.turn_timeout_secs == 0 {
            return Err(QuarryError::ConfigError {
                reason: "turn_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(QuarryError::ConfigError {
                reason: "rate_limit requests and window_secs must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.prescreen_confidence_threshold) {
            return Err(QuarryError::ConfigError {
                reason: "prescreen_confidence_threshold must be between 0 and 1".to_string(),
            });
        }
        Ok(())
    }
}
