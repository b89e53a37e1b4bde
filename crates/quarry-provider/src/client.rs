//! The provider-client seam and its HTTP implementation.
//!
//! One call is one outbound request: no retries, no caching. The caller
//! owns timeouts and cancellation at the turn level; the HTTP client adds
//! its own per-request timeout underneath.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use quarry_contracts::{
    agent::ProviderKind,
    error::{QuarryError, QuarryResult},
    message::{ChatRequest, ChatResponse},
};

use crate::{anthropic, google, openai, settings::ProviderSettings};

/// Anything that can answer a uniform chat request.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send `request` to `model` at `provider`.
    ///
    /// `api_key` overrides the configured key for this call.
    async fn call(
        &self,
        provider: ProviderKind,
        model: &str,
        request: &ChatRequest,
        api_key: Option<&str>,
    ) -> QuarryResult<ChatResponse>;
}

/// Talks to the real vendor APIs over HTTPS.
#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    settings: ProviderSettings,
}

impl HttpProviderClient {
    pub fn new(settings: ProviderSettings) -> QuarryResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| QuarryError::ConfigError {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn resolve_key<'a>(&'a self, provider: ProviderKind, api_key: Option<&'a str>) -> QuarryResult<&'a str> {
        api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.settings.api_key(provider))
            .ok_or_else(|| QuarryError::MissingApiKey {
                provider: provider.to_string(),
            })
    }

    async fn call_openai_compatible(
        &self,
        vendor: &str,
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        request: &ChatRequest,
    ) -> QuarryResult<ChatResponse> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut builder = self.http.post(url).json(&openai::build_request(model, request));
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }
        let response: openai::WireResponse = self.send(vendor, builder).await?;
        openai::parse_response(response)
    }

    async fn send<T: DeserializeOwned>(&self, vendor: &str, builder: RequestBuilder) -> QuarryResult<T> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                QuarryError::Timeout {
                    secs: self.settings.timeout_secs,
                }
            } else {
                QuarryError::Transport {
                    reason: format!("{} request failed: {}", vendor, e),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(vendor = %vendor, status = status.as_u16(), "provider returned an error status");
            return Err(QuarryError::ProviderHttp {
                provider: vendor.to_string(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        response.json::<T>().await.map_err(|e| QuarryError::ProviderResponse {
            reason: format!("{} response did not decode: {}", vendor, e),
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn call(
        &self,
        provider: ProviderKind,
        model: &str,
        request: &ChatRequest,
        api_key: Option<&str>,
    ) -> QuarryResult<ChatResponse> {
        if request.messages.is_empty() {
            return Err(QuarryError::InvalidRequest {
                reason: "a chat request needs at least one message".to_string(),
            });
        }
        debug!(
            provider = %provider,
            model = %model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "provider call"
        );

        match provider {
            ProviderKind::OpenAi => {
                let key = self.resolve_key(provider, api_key)?;
                self.call_openai_compatible("OpenAI", &self.settings.openai_base_url, Some(key), model, request)
                    .await
            }
            ProviderKind::Custom => {
                let base_url = self.settings.custom_base_url.as_deref().ok_or_else(|| {
                    QuarryError::UnsupportedProvider {
                        reason: "custom provider needs CUSTOM_LLM_BASE_URL".to_string(),
                    }
                })?;
                let key = api_key.or_else(|| self.settings.api_key(provider));
                self.call_openai_compatible("Custom", base_url, key, model, request)
                    .await
            }
            ProviderKind::Anthropic => {
                let key = self.resolve_key(provider, api_key)?;
                let url = format!("{}/messages", self.settings.anthropic_base_url.trim_end_matches('/'));
                let builder = self
                    .http
                    .post(url)
                    .header("x-api-key", key)
                    .header("anthropic-version", anthropic::API_VERSION)
                    .json(&anthropic::build_request(model, request));
                let response: anthropic::WireResponse = self.send("Anthropic", builder).await?;
                Ok(anthropic::parse_response(response))
            }
            ProviderKind::Google => {
                let key = self.resolve_key(provider, api_key)?;
                let url = format!(
                    "{}/models/{}:generateContent",
                    self.settings.google_base_url.trim_end_matches('/'),
                    model
                );
                let builder = self
                    .http
                    .post(url)
                    .query(&[("key", key)])
                    .json(&google::build_request(request));
                let response: google::WireResponse = self.send("Google", builder).await?;
                Ok(google::parse_response(response))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
