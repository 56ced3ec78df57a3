// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::llm::{
    error::ClientResult,
    llm_basics::{ConversationHistory, DEFAULT_SYSTEM_PROMPT, merge_extra},
    llm_client::Provider,
    llm_provider::{ChatProvider, Connection},
};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

pub const DEFAULT_MODEL: &str = "sonar";

#[derive(Debug, Serialize)]
struct PerplexityRequest<'a> {
    model: &'a str,
    messages: &'a ConversationHistory,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Options for [`PerplexityClient::chat_completion`]
#[derive(Debug, Clone)]
pub struct PerplexityChatOptions {
    pub model: String,
    pub temperature: Option<f64>,
    pub extra: Map<String, Value>,
    pub cancel: Option<CancellationToken>,
}

impl Default for PerplexityChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            extra: Map::new(),
            cancel: None,
        }
    }
}

impl PerplexityChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Perplexity chat completion client. Same payload shape as OpenAI, no
/// embeddings and no answer unwrapping.
#[derive(Debug)]
pub struct PerplexityClient {
    settings: Settings,
    connection: Connection,
    history: ConversationHistory,
}

impl PerplexityClient {
    pub fn new(settings: Settings) -> ClientResult<Self> {
        settings.expect_provider(Provider::Perplexity)?;
        let connection = Connection::new("Perplexity", &settings)?;

        Ok(Self {
            settings,
            connection,
            history: ConversationHistory::with_system_prompt(DEFAULT_SYSTEM_PROMPT),
        })
    }

    /// Build a client from `PPLX_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::new(Settings::from_env(Provider::Perplexity)?)
    }

    /// Replace the system prompt. Resets the conversation.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history = ConversationHistory::with_system_prompt(prompt);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub async fn chat_completion(
        &mut self,
        query: &str,
        options: &PerplexityChatOptions,
    ) -> ClientResult<Value> {
        self.connection.ensure_open()?;
        self.history.push_user(query);

        let request = PerplexityRequest {
            model: &options.model,
            messages: &self.history,
            temperature: options.temperature,
        };
        let payload = merge_extra(serde_json::to_value(&request)?, &options.extra);

        self.connection
            .post(CHAT_COMPLETIONS_PATH, &payload, options.cancel.as_ref())
            .await
    }

    pub fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
    }
}

#[async_trait]
impl ChatProvider for PerplexityClient {
    fn provider_name(&self) -> &str {
        Provider::Perplexity.as_str()
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn send_query(&mut self, query: &str) -> ClientResult<Value> {
        self.chat_completion(query, &PerplexityChatOptions::default())
            .await
    }

    fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
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

    fn client(base_url: &str) -> PerplexityClient {
        let settings = Settings::resolve(
            Provider::Perplexity,
            SettingsOverrides::new()
                .with_api_key("test_key")
                .with_base_url(base_url)
                .with_max_retries(0),
            &HashMap::new(),
        )
        .unwrap();
        PerplexityClient::new(settings).unwrap()
    }

    #[test]
    fn test_perplexity_client_creation() {
        let client = client("https://api.perplexity.ai/");
        assert_eq!(client.provider_name(), "perplexity");
        assert_eq!(client.history().len(), 1);
        assert_eq!(
            client.settings().poll_interval(),
            Some(std::time::Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn test_chat_completion_accumulates_history() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test_key")
            .match_header("accept", "application/json")
            .match_body(Matcher::Json(json!({
                "model": "sonar-pro",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "one"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Json(json!({
                "model": "sonar-pro",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "one"},
                    {"role": "user", "content": "two"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let mut client = client(&server.url()).with_system_prompt("sys");
        let options = PerplexityChatOptions::new().with_model("sonar-pro");
        let envelope = client.chat_completion("one", &options).await.unwrap();
        client.chat_completion("two", &options).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(envelope, json!({"choices": []}));
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let mut client = client(&server.url());
        let result = client
            .chat_completion("hello", &PerplexityChatOptions::new())
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ClientError::Final(_))));
    }

    #[tokio::test]
    async fn test_send_query_through_trait() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "sonar"})))
            .with_status(200)
            .with_body(r#"{"id": "p"}"#)
            .create_async()
            .await;

        let mut client = client(&server.url());
        let provider: &mut dyn ChatProvider = &mut client;
        let envelope = provider.send_query("hello").await.unwrap();
        assert_eq!(envelope, json!({"id": "p"}));
        assert_eq!(provider.history().len(), 2);
    }
}
