// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::llm::{
    error::ClientResult,
    llm_basics::{
        ChatReply, ConversationHistory, DEFAULT_SYSTEM_PROMPT, EmbeddingReply, extract_answer,
        extract_embedding, merge_extra,
    },
    llm_client::Provider,
    llm_provider::{ChatProvider, Connection},
};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const EMBEDDINGS_PATH: &str = "embeddings";

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-nano";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_TEMPERATURE: f64 = 0.85;

#[derive(Debug, Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a ConversationHistory,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a Value,
}

/// Options for [`OpenAIClient::chat_completion`]
#[derive(Debug, Clone)]
pub struct OpenAIChatOptions {
    pub model: String,
    pub temperature: f64,
    /// Return only `choices[0].message.content` instead of the envelope
    pub return_only_answer: bool,
    /// Additional payload fields; they override same-named fields
    pub extra: Map<String, Value>,
    pub cancel: Option<CancellationToken>,
}

impl Default for OpenAIChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            return_only_answer: false,
            extra: Map::new(),
            cancel: None,
        }
    }
}

impl OpenAIChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn answer_only(mut self) -> Self {
        self.return_only_answer = true;
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

/// Options for [`OpenAIClient::embeddings`]
#[derive(Debug, Clone)]
pub struct OpenAIEmbeddingOptions {
    pub model: String,
    /// Return only `data[0].embedding` instead of the envelope
    pub return_only_embeddings: bool,
    pub extra: Map<String, Value>,
    pub cancel: Option<CancellationToken>,
}

impl Default for OpenAIEmbeddingOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            return_only_embeddings: false,
            extra: Map::new(),
            cancel: None,
        }
    }
}

impl OpenAIEmbeddingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn vector_only(mut self) -> Self {
        self.return_only_embeddings = true;
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

/// Client for OpenAI-style chat completion and embeddings endpoints.
///
/// The system prompt is the first entry of the history and every call
/// appends the user query, so one instance carries one conversation.
#[derive(Debug)]
pub struct OpenAIClient {
    settings: Settings,
    connection: Connection,
    history: ConversationHistory,
}

impl OpenAIClient {
    pub fn new(settings: Settings) -> ClientResult<Self> {
        settings.expect_provider(Provider::OpenAI)?;
        let connection = Connection::new("OpenAI", &settings)?;

        Ok(Self {
            settings,
            connection,
            history: ConversationHistory::with_system_prompt(DEFAULT_SYSTEM_PROMPT),
        })
    }

    /// Build a client from `OPENAI_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::new(Settings::from_env(Provider::OpenAI)?)
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

    /// Call the chat completions endpoint
    pub async fn chat_completion(
        &mut self,
        query: &str,
        options: &OpenAIChatOptions,
    ) -> ClientResult<ChatReply> {
        self.connection.ensure_open()?;
        self.history.push_user(query);

        let request = OpenAIChatRequest {
            model: &options.model,
            messages: &self.history,
            temperature: options.temperature,
        };
        let payload = merge_extra(serde_json::to_value(&request)?, &options.extra);

        let envelope = self
            .connection
            .post(CHAT_COMPLETIONS_PATH, &payload, options.cancel.as_ref())
            .await?;

        if options.return_only_answer {
            return Ok(ChatReply::Answer(extract_answer(&envelope)?));
        }
        Ok(ChatReply::Envelope(envelope))
    }

    /// Call the embeddings endpoint. `input` may be a string or an array of
    /// strings. The conversation history is left untouched.
    pub async fn embeddings(
        &self,
        input: impl Into<Value>,
        options: &OpenAIEmbeddingOptions,
    ) -> ClientResult<EmbeddingReply> {
        self.connection.ensure_open()?;

        let input = input.into();
        let request = OpenAIEmbeddingRequest {
            model: &options.model,
            input: &input,
        };
        let payload = merge_extra(serde_json::to_value(&request)?, &options.extra);

        let envelope = self
            .connection
            .post(EMBEDDINGS_PATH, &payload, options.cancel.as_ref())
            .await?;

        if options.return_only_embeddings {
            return Ok(EmbeddingReply::Vector(extract_embedding(&envelope)?));
        }
        Ok(EmbeddingReply::Envelope(envelope))
    }

    pub fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
    }
}

#[async_trait]
impl ChatProvider for OpenAIClient {
    fn provider_name(&self) -> &str {
        Provider::OpenAI.as_str()
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    async fn send_query(&mut self, query: &str) -> ClientResult<Value> {
        let reply = self
            .chat_completion(query, &OpenAIChatOptions::default())
            .await?;
        Ok(match reply {
            ChatReply::Envelope(envelope) => envelope,
            ChatReply::Answer(answer) => Value::String(answer),
        })
    }

    fn close(&mut self) -> ClientResult<()> {
        self.connection.close()
    }
}
