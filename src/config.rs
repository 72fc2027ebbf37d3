//! Deploy-time configuration, loaded from a JSON file at startup.

use std::fmt;

use serde::Deserialize;

use crate::cache;
use crate::gateway;
use crate::ratelimit;

fn default_model() -> String {
    crate::providers::DEFAULT_MODEL.to_string()
}

/// Credentials and model selection for the hosted provider.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    pub account_id: String,
    pub api_token: String,
    #[serde(default = "default_model")]
    pub model: String,
}

// The token never appears in logs, even at debug level.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("account_id", &self.account_id)
            .field("api_token", &"***")
            .field("model", &self.model)
            .finish()
    }
}

fn default_window_limit() -> u32 {
    ratelimit::DEFAULT_WINDOW_LIMIT
}

fn default_window_secs() -> u64 {
    ratelimit::DEFAULT_WINDOW_SECS
}

#[derive(Clone, Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_window_limit")]
    pub requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests: default_window_limit(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    cache::DEFAULT_TTL_SECS
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.8
}

fn default_provider_timeout() -> u64 {
    gateway::DEFAULT_PROVIDER_TIMEOUT_SECS
}

#[derive(Clone, Debug, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            provider_timeout_secs: default_provider_timeout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub generation: GenerationSettings,
}

impl GatewayConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn generation_config(&self) -> gateway::GenerationConfig {
        gateway::GenerationConfig {
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
            provider_timeout: std::time::Duration::from_secs(
                self.generation.provider_timeout_secs,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config = GatewayConfig::from_json_str(
            r#"{ "provider": { "account_id": "acc", "api_token": "tok" } }"#,
        )
        .expect("config");

        assert_eq!(config.provider.model, default_model());
        assert_eq!(config.limits.requests, 10);
        assert_eq!(config.limits.window_secs, 60);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.generation.provider_timeout_secs, 120);
    }

    #[test]
    fn explicit_values_override_the_defaults() {
        let config = GatewayConfig::from_json_str(
            r#"{
                "provider": { "account_id": "acc", "api_token": "tok", "model": "@cf/custom" },
                "limits": { "requests": 3, "window_secs": 10 },
                "cache_ttl_secs": 30,
                "generation": { "max_tokens": 64, "temperature": 0.2, "provider_timeout_secs": 5 }
            }"#,
        )
        .expect("config");

        assert_eq!(config.provider.model, "@cf/custom");
        assert_eq!(config.limits.requests, 3);
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.generation_config().max_tokens, 64);
    }

    #[test]
    fn debug_output_redacts_the_api_token() {
        let config = GatewayConfig::from_json_str(
            r#"{ "provider": { "account_id": "acc", "api_token": "secret-token" } }"#,
        )
        .expect("config");

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("***"));
    }
}
