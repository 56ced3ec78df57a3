// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::llm::llm_client::Provider;
use crate::llm::retry_utils::RetryPolicy;

/// Config errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{env_var} must be provided either as parameter or environment variable")]
    MissingCredential { env_var: &'static str },

    #[error("invalid value for {key} ({value:?}): {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Source of environment variables consulted while resolving settings
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Environment variable names for one provider
#[derive(Debug, Clone, Copy)]
struct EnvKeys {
    api_key: &'static str,
    base_url: &'static str,
    timeout: &'static str,
    max_retries: &'static str,
    backoff_factor: &'static str,
    api_version: Option<&'static str>,
    poll_interval: Option<&'static str>,
}

const OPENAI_ENV: EnvKeys = EnvKeys {
    api_key: "OPENAI_API_KEY",
    base_url: "OPENAI_API_BASE",
    timeout: "OPENAI_TIMEOUT",
    max_retries: "OPENAI_MAX_RETRIES",
    backoff_factor: "OPENAI_BACKOFF_FACTOR",
    api_version: None,
    poll_interval: None,
};

const ANTHROPIC_ENV: EnvKeys = EnvKeys {
    api_key: "ANTHROPIC_API_KEY",
    base_url: "ANTHROPIC_API_BASE_URL",
    timeout: "ANTHROPIC_TIMEOUT",
    max_retries: "ANTHROPIC_MAX_RETRIES",
    backoff_factor: "ANTHROPIC_BACKOFF_FACTOR",
    api_version: Some("ANTHROPIC_API_VERSION"),
    poll_interval: None,
};

const PERPLEXITY_ENV: EnvKeys = EnvKeys {
    api_key: "PPLX_API_KEY",
    base_url: "PPLX_API_BASE_URL",
    timeout: "PPLX_TIMEOUT",
    max_retries: "PPLX_MAX_RETRIES",
    backoff_factor: "PPLX_BACKOFF_FACTOR",
    api_version: None,
    poll_interval: Some("PPLX_POLL_INTERVAL"),
};

pub const DEFAULT_TIMEOUT_SECS: f64 = 120.0;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;

fn env_keys(provider: Provider) -> EnvKeys {
    match provider {
        Provider::OpenAI => OPENAI_ENV,
        Provider::Anthropic => ANTHROPIC_ENV,
        Provider::Perplexity => PERPLEXITY_ENV,
    }
}

fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "https://api.openai.com/v1/",
        Provider::Anthropic => "https://api.anthropic.com/v1/",
        Provider::Perplexity => "https://api.perplexity.ai/",
    }
}

/// Explicit values that take precedence over the environment.
///
/// Every field left as `None` falls back to the provider's environment
/// variable and then to the built-in default.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub backoff_factor: Option<f64>,
    pub api_version: Option<String>,
    pub poll_interval: Option<Duration>,
}

impl SettingsOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = Some(backoff_factor);
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }
}

/// Immutable per-provider client configuration
#[derive(Clone)]
pub struct Settings {
    provider: Provider,
    api_key: String,
    base_url: Url,
    timeout: Duration,
    max_retries: u32,
    backoff_factor: f64,
    api_version: Option<String>,
    poll_interval: Option<Duration>,
}

impl Settings {
    /// Resolve settings against the process environment
    pub fn new(provider: Provider, overrides: SettingsOverrides) -> Result<Self, ConfigError> {
        Self::resolve(provider, overrides, &ProcessEnv)
    }

    /// Resolve settings purely from the process environment and defaults
    pub fn from_env(provider: Provider) -> Result<Self, ConfigError> {
        Self::resolve(provider, SettingsOverrides::default(), &ProcessEnv)
    }

    /// Resolve every field as explicit value, else environment, else default
    pub fn resolve(
        provider: Provider,
        overrides: SettingsOverrides,
        env: &dyn EnvSource,
    ) -> Result<Self, ConfigError> {
        let keys = env_keys(provider);

        let api_key = non_empty(overrides.api_key)
            .or_else(|| lookup(env, keys.api_key))
            .ok_or(ConfigError::MissingCredential {
                env_var: keys.api_key,
            })?;

        let base_url = match non_empty(overrides.base_url) {
            Some(raw) => parse_base_url("base_url", &raw)?,
            None => match lookup(env, keys.base_url) {
                Some(raw) => parse_base_url(keys.base_url, &raw)?,
                None => parse_base_url("base_url", default_base_url(provider))?,
            },
        };

        let timeout = match overrides.timeout {
            Some(timeout) if timeout.is_zero() => {
                return Err(invalid("timeout", format!("{timeout:?}"), "must be greater than zero"));
            }
            Some(timeout) => timeout,
            None => match lookup(env, keys.timeout) {
                Some(raw) => parse_seconds(keys.timeout, &raw)?,
                None => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            },
        };

        let max_retries = match overrides.max_retries {
            Some(max_retries) => max_retries,
            None => match lookup(env, keys.max_retries) {
                Some(raw) => raw
                    .parse::<u32>()
                    .map_err(|e| invalid(keys.max_retries, raw.clone(), e.to_string()))?,
                None => DEFAULT_MAX_RETRIES,
            },
        };

        let backoff_factor = match overrides.backoff_factor {
            Some(factor) => check_backoff_factor("backoff_factor", factor)?,
            None => match lookup(env, keys.backoff_factor) {
                Some(raw) => {
                    let factor = raw
                        .parse::<f64>()
                        .map_err(|e| invalid(keys.backoff_factor, raw.clone(), e.to_string()))?;
                    check_backoff_factor(keys.backoff_factor, factor)?
                }
                None => DEFAULT_BACKOFF_FACTOR,
            },
        };

        let api_version = match keys.api_version {
            Some(key) => Some(
                non_empty(overrides.api_version)
                    .or_else(|| lookup(env, key))
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
            ),
            None => None,
        };

        let poll_interval = match keys.poll_interval {
            Some(key) => Some(match overrides.poll_interval {
                Some(interval) => interval,
                None => match lookup(env, key) {
                    Some(raw) => parse_seconds(key, &raw)?,
                    None => Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
                },
            }),
            None => None,
        };

        Ok(Self {
            provider,
            api_key,
            base_url,
            timeout,
            max_retries,
            backoff_factor,
            api_version,
            poll_interval,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base URL, always ending with `/`
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// `anthropic-version` header value; only set for Anthropic
    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// Only set for Perplexity. No client operation polls yet.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_factor)
    }

    /// Reject settings resolved for a different provider
    pub fn expect_provider(&self, expected: Provider) -> Result<(), ConfigError> {
        if self.provider == expected {
            Ok(())
        } else {
            Err(invalid(
                "provider",
                self.provider.as_str(),
                format!("settings were resolved for {}, expected {}", self.provider, expected),
            ))
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("backoff_factor", &self.backoff_factor)
            .field("api_version", &self.api_version)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn lookup(env: &dyn EnvSource, key: &str) -> Option<String> {
    non_empty(env.var(key))
}

fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
        reason: reason.into(),
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = raw
        .parse::<f64>()
        .map_err(|e| invalid(key, raw, e.to_string()))?;
    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid(key, raw, "must be greater than zero"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(key, raw, e.to_string()))
}

fn check_backoff_factor(key: &str, factor: f64) -> Result<f64, ConfigError> {
    if factor.is_finite() && factor >= 0.0 {
        Ok(factor)
    } else {
        Err(invalid(key, factor.to_string(), "must be a finite number >= 0"))
    }
}

fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| invalid(key, raw, e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid(key, raw, "URL cannot be used as a base"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
