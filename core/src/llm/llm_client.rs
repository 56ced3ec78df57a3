// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

//! Provider selection for OpenAI, Anthropic and Perplexity.
//!
//! [`ProviderClient`] picks the concrete client from the provider recorded in
//! the [`Settings`] and forwards [`ChatProvider`] calls to it.
//!
//! # Example usage
//!
//! ```no_run
//! use llmconnectors::config::{Settings, SettingsOverrides};
//! use llmconnectors::llm::{ChatProvider, Provider, ProviderClient};
//!
//! # async fn run() -> Result<(), llmconnectors::llm::ClientError> {
//! let settings = Settings::new(
//!     "anthropic".parse::<Provider>()?,
//!     SettingsOverrides::new().with_api_key("sk-ant-..."),
//! )?;
//! let mut client = ProviderClient::new(settings)?;
//!
//! let envelope = client.send_query("What is a borrow checker?").await?;
//! println!("{envelope}");
//! client.close()?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::config::{ConfigError, Settings};
use crate::llm::{
    anthropic_client::AnthropicClient,
    error::ClientResult,
    llm_basics::ConversationHistory,
    llm_provider::ChatProvider,
    openai_client::OpenAIClient,
    perplexity_client::PerplexityClient,
};

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// OpenAI chat completions and embeddings
    OpenAI,
    /// Anthropic messages
    Anthropic,
    /// Perplexity chat completions
    Perplexity,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::Anthropic, Provider::Perplexity];

    /// Get string representation of the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Perplexity => "perplexity",
        }
    }

    /// Prefix shared by this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_",
            Provider::Anthropic => "ANTHROPIC_",
            Provider::Perplexity => "PPLX_",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(provider: &str) -> Result<Self, Self::Err> {
        match provider.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "perplexity" => Ok(Provider::Perplexity),
            _ => Err(ConfigError::InvalidValue {
                key: "provider".to_string(),
                value: provider.to_string(),
                reason: "Unsupported provider".to_string(),
            }),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> String {
        provider.as_str().to_string()
    }
}

/// Client wrapper that handles the different providers
#[derive(Debug)]
pub enum ProviderClient {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
    Perplexity(PerplexityClient),
}

impl ProviderClient {
    /// Instantiate the client matching `settings.provider()`
    pub fn new(settings: Settings) -> ClientResult<Self> {
        let client = match settings.provider() {
            Provider::OpenAI => ProviderClient::OpenAI(OpenAIClient::new(settings)?),
            Provider::Anthropic => ProviderClient::Anthropic(AnthropicClient::new(settings)?),
            Provider::Perplexity => ProviderClient::Perplexity(PerplexityClient::new(settings)?),
        };
        Ok(client)
    }

    pub fn from_env(provider: Provider) -> ClientResult<Self> {
        Self::new(Settings::from_env(provider)?)
    }

    pub fn provider(&self) -> Provider {
        self.settings().provider()
    }

    pub fn settings(&self) -> &Settings {
        match self {
            ProviderClient::OpenAI(client) => client.settings(),
            ProviderClient::Anthropic(client) => client.settings(),
            ProviderClient::Perplexity(client) => client.settings(),
        }
    }

    /// The OpenAI client, for embeddings and answer unwrapping
    pub fn as_openai_mut(&mut self) -> Option<&mut OpenAIClient> {
        match self {
            ProviderClient::OpenAI(client) => Some(client),
            _ => None,
        }
    }
}

impl From<OpenAIClient> for ProviderClient {
    fn from(client: OpenAIClient) -> Self {
        ProviderClient::OpenAI(client)
    }
}

impl From<AnthropicClient> for ProviderClient {
    fn from(client: AnthropicClient) -> Self {
        ProviderClient::Anthropic(client)
    }
}

impl From<PerplexityClient> for ProviderClient {
    fn from(client: PerplexityClient) -> Self {
        ProviderClient::Perplexity(client)
    }
}

#[async_trait]
impl ChatProvider for ProviderClient {
    fn provider_name(&self) -> &str {
        match self {
            ProviderClient::OpenAI(client) => client.provider_name(),
            ProviderClient::Anthropic(client) => client.provider_name(),
            ProviderClient::Perplexity(client) => client.provider_name(),
        }
    }

    fn history(&self) -> &ConversationHistory {
        match self {
            ProviderClient::OpenAI(client) => client.history(),
            ProviderClient::Anthropic(client) => client.history(),
            ProviderClient::Perplexity(client) => client.history(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            ProviderClient::OpenAI(client) => client.is_closed(),
            ProviderClient::Anthropic(client) => client.is_closed(),
            ProviderClient::Perplexity(client) => client.is_closed(),
        }
    }

    async fn send_query(&mut self, query: &str) -> ClientResult<Value> {
        match self {
            ProviderClient::OpenAI(client) => client.send_query(query).await,
            ProviderClient::Anthropic(client) => client.send_query(query).await,
            ProviderClient::Perplexity(client) => client.send_query(query).await,
        }
    }

    fn close(&mut self) -> ClientResult<()> {
        match self {
            ProviderClient::OpenAI(client) => client.close(),
            ProviderClient::Anthropic(client) => client.close(),
            ProviderClient::Perplexity(client) => client.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsOverrides;
    use crate::llm::error::ClientError;
    use mockito::Matcher;
    use serde_json::json;
    use std::collections::HashMap;

    fn settings(provider: Provider, base_url: &str) -> Settings {
        Settings::resolve(
            provider,
            SettingsOverrides::new()
                .with_api_key("test_key")
                .with_base_url(base_url)
                .with_max_retries(0),
            &HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!("ANTHROPIC".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert_eq!("Perplexity".parse::<Provider>().unwrap(), Provider::Perplexity);

        let err = "openrouter".parse::<Provider>().unwrap_err();
        assert!(err.to_string().contains("Unsupported provider"));
    }

    #[test]
    fn test_provider_as_str() {
        assert_eq!(Provider::OpenAI.as_str(), "openai");
        assert_eq!(Provider::Anthropic.as_str(), "anthropic");
        assert_eq!(Provider::Perplexity.as_str(), "perplexity");
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(format!("{}", Provider::OpenAI), "openai");
        assert_eq!(format!("{}", Provider::Perplexity), "perplexity");
    }

    #[test]
    fn test_provider_to_string() {
        let provider_str: String = Provider::Anthropic.into();
        assert_eq!(provider_str, "anthropic");
    }

    #[test]
    fn test_provider_client_dispatch() {
        for provider in Provider::ALL {
            let client = ProviderClient::new(settings(provider, "http://127.0.0.1:9/")).unwrap();
            assert_eq!(client.provider(), provider);
            assert_eq!(client.provider_name(), provider.as_str());
            assert!(!client.is_closed());
        }
    }

    #[test]
    fn test_as_openai_mut() {
        let mut openai =
            ProviderClient::new(settings(Provider::OpenAI, "http://127.0.0.1:9/")).unwrap();
        assert!(openai.as_openai_mut().is_some());

        let mut anthropic =
            ProviderClient::new(settings(Provider::Anthropic, "http://127.0.0.1:9/")).unwrap();
        assert!(anthropic.as_openai_mut().is_none());
    }

    #[tokio::test]
    async fn test_send_query_routes_to_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test_key")
            .match_body(Matcher::PartialJson(json!({
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_body(r#"{"id": "msg_1"}"#)
            .create_async()
            .await;

        let mut client =
            ProviderClient::new(settings(Provider::Anthropic, &server.url())).unwrap();
        let envelope = client.send_query("hello").await.unwrap();

        mock.assert_async().await;
        assert_eq!(envelope, json!({"id": "msg_1"}));
    }

    #[tokio::test]
    async fn test_close_through_wrapper() {
        let mut client =
            ProviderClient::new(settings(Provider::Perplexity, "http://127.0.0.1:9/")).unwrap();
        assert!(client.close().is_ok());
        assert!(client.is_closed());
        assert!(matches!(client.close(), Err(ClientError::Closed)));
        assert!(matches!(
            client.send_query("hello").await,
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_independent_instances_run_concurrently() {
        let mut server = mockito::Server::new_async().await;
        let _openai = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test_key")
            .with_status(200)
            .with_body(r#"{"id": "chat"}"#)
            .expect(2)
            .create_async()
            .await;

        let mut first = ProviderClient::new(settings(Provider::OpenAI, &server.url())).unwrap();
        let mut second =
            ProviderClient::new(settings(Provider::Perplexity, &server.url())).unwrap();

        let (a, b) =
            futures::future::join(first.send_query("one"), second.send_query("two")).await;

        assert_eq!(a.unwrap(), json!({"id": "chat"}));
        assert_eq!(b.unwrap(), json!({"id": "chat"}));
        assert_eq!(first.history().len(), 2);
        assert_eq!(second.history().len(), 2);
    }
}
