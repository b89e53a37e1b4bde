//! Provider credentials and endpoints.

use serde::Deserialize;

use quarry_contracts::agent::ProviderKind;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Where each vendor lives and the keys used when an agent brings none.
///
/// Keys are never logged; `Debug` redacts them.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub custom_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub google_base_url: String,
    /// OpenAI-compatible endpoint for `ProviderKind::Custom`. Unset means
    /// the custom provider is not configured.
    pub custom_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            google_api_key: None,
            custom_api_key: None,
            openai_base_url: OPENAI_BASE_URL.to_string(),
            anthropic_base_url: ANTHROPIC_BASE_URL.to_string(),
            google_base_url: GOOGLE_BASE_URL.to_string(),
            custom_base_url: None,
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    /// Read keys and the custom endpoint from the environment.
    ///
    /// `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GOOGLE_API_KEY`,
    /// `CUSTOM_LLM_API_KEY`, `CUSTOM_LLM_BASE_URL`, and
    /// `LLM_TIMEOUT_SECS` are consulted; everything else keeps its default.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            google_api_key: var("GOOGLE_API_KEY"),
            custom_api_key: var("CUSTOM_LLM_API_KEY"),
            custom_base_url: var("CUSTOM_LLM_BASE_URL"),
            timeout_secs: var("LLM_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            ..defaults
        }
    }

    /// Point every vendor at one base URL, for mock servers.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.openai_base_url = base_url.to_string();
        self.anthropic_base_url = base_url.to_string();
        self.google_base_url = base_url.to_string();
        self.custom_base_url = Some(base_url.to_string());
        self
    }

    /// The configured key for `provider`.
    pub fn api_key(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
            ProviderKind::Google => self.google_api_key.as_deref(),
            ProviderKind::Custom => self.custom_api_key.as_deref(),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderSettings")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .field("google_api_key", &redact(&self.google_api_key))
            .field("custom_api_key", &redact(&self.custom_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("google_base_url", &self.google_base_url)
            .field("custom_base_url", &self.custom_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use quarry_contracts::agent::ProviderKind;

    use super::ProviderSettings;

    #[test]
    fn test_debug_output_redacts_keys() {
        let settings = ProviderSettings {
            openai_api_key: Some("sk-very-secret".into()),
            ..ProviderSettings::default()
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_key_lookup_is_per_provider() {
        let settings = ProviderSettings {
            google_api_key: Some("g".into()),
            ..ProviderSettings::default()
        };
        assert_eq!(settings.api_key(ProviderKind::Google), Some("g"));
        assert_eq!(settings.api_key(ProviderKind::OpenAi), None);
        assert!(settings.custom_base_url.is_none());
    }
}
