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

const MESSAGES_PATH: &str = "messages";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic request structure
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a ConversationHistory,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
}

/// Options for [`AnthropicClient::chat_completion`]
#[derive(Debug, Clone)]
pub struct AnthropicChatOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub extra: Map<String, Value>,
    pub cancel: Option<CancellationToken>,
}

impl Default for AnthropicChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: None,
            stop_sequences: None,
            extra: Map::new(),
            cancel: None,
        }
    }
}

impl AnthropicChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// `None` leaves `max_tokens` out of the payload
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(stop_sequences);
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

/// Anthropic client implementation.
///
/// The Messages API has no `system` role: the system prompt travels as a
/// top-level field and the history holds user turns only.
#[derive(Debug)]
pub struct AnthropicClient {
    settings: Settings,
    connection: Connection,
    system_prompt: String,
    history: ConversationHistory,
}

impl AnthropicClient {
    pub fn new(settings: Settings) -> ClientResult<Self> {
        settings.expect_provider(Provider::Anthropic)?;
        let connection = Connection::new("Anthropic", &settings)?;

        Ok(Self {
            settings,
            connection,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history: ConversationHistory::new(),
        })
    }

    /// Build a client from `ANTHROPIC_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::new(Settings::from_env(Provider::Anthropic)?)
    }

    /// Replace the system prompt; an empty prompt keeps the default
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.is_empty() {
            self.system_prompt = prompt;
        }
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Call the messages endpoint and return the raw envelope
    pub async fn chat_completion(
        &mut self,
        query: &str,
        options: &AnthropicChatOptions,
    ) -> ClientResult<Value> {
        self.connection.ensure_open()?;
        self.history.push_user(query);

        let request = AnthropicRequest {
            model: &options.model,
            system: &self.system_prompt,
            messages: &self.history,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop_sequences: options.stop_sequences.as_deref(),
        };
        let payload = merge_extra(serde_json::to_value(&request)?, &options.extra);

        self.connection
            .post(MESSAGES_PATH, &payload, options.cancel.as_ref())
            .await
    }

    pub fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
    }
}

#[async_trait]
impl ChatProvider for AnthropicClient {
    fn provider_name(&self) -> &str {
        Provider::Anthropic.as_str()
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn send_query(&mut self, query: &str) -> ClientResult<Value> {
        self.chat_completion(query, &AnthropicChatOptions::default())
            .await
    }

    fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
    }
}
