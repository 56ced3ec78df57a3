// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::llm::error::ResponseShapeError;

/// System prompt used when a client is built without one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert, wise, and playful AI mentor. \
You explain technical and scientific ideas clearly, with curiosity and intelligence. \
You never produce hallucinations; if unsure, you say you don’t know. \
You encourage critical thinking, prompt questions, and rigor.";

/// JSON pointer to the answer text of a chat completion envelope
pub const CHAT_ANSWER_POINTER: &str = "/choices/0/message/content";

/// JSON pointer to the first vector of an embeddings envelope
pub const EMBEDDING_POINTER: &str = "/data/0/embedding";

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from system
    System,
    /// Message from the user/human
    User,
    /// Message from the AI assistant
    Assistant,
}

impl MessageRole {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One turn of a conversation, as sent on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Ordered message history owned by a single client.
///
/// Clients only ever append user turns. Replies from the model are not
/// written back, so multi-turn context carries the user side only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a leading system message
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Result of a chat completion call
#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    /// Only the answer text, when the caller asked for it
    Answer(String),
    /// The full provider envelope
    Envelope(Value),
}

impl ChatReply {
    pub fn as_answer(&self) -> Option<&str> {
        match self {
            ChatReply::Answer(answer) => Some(answer),
            ChatReply::Envelope(_) => None,
        }
    }

    pub fn into_envelope(self) -> Option<Value> {
        match self {
            ChatReply::Envelope(envelope) => Some(envelope),
            ChatReply::Answer(_) => None,
        }
    }
}

/// Result of an embeddings call
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingReply {
    Vector(Vec<f64>),
    Envelope(Value),
}

impl EmbeddingReply {
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            EmbeddingReply::Vector(vector) => Some(vector),
            EmbeddingReply::Envelope(_) => None,
        }
    }

    pub fn into_envelope(self) -> Option<Value> {
        match self {
            EmbeddingReply::Envelope(envelope) => Some(envelope),
            EmbeddingReply::Vector(_) => None,
        }
    }
}

fn shape_error(pointer: &str, reason: impl Into<String>) -> ResponseShapeError {
    ResponseShapeError::UnexpectedBody {
        pointer: pointer.to_string(),
        reason: reason.into(),
    }
}

/// Look up `pointer` in `envelope`, failing with a shape error when absent
pub fn extract<'a>(envelope: &'a Value, pointer: &str) -> Result<&'a Value, ResponseShapeError> {
    envelope
        .pointer(pointer)
        .ok_or_else(|| shape_error(pointer, "path not present"))
}

/// `choices[0].message.content` as a string
pub fn extract_answer(envelope: &Value) -> Result<String, ResponseShapeError> {
    extract(envelope, CHAT_ANSWER_POINTER)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| shape_error(CHAT_ANSWER_POINTER, "expected a string"))
}

/// `data[0].embedding` as a vector of floats
pub fn extract_embedding(envelope: &Value) -> Result<Vec<f64>, ResponseShapeError> {
    extract(envelope, EMBEDDING_POINTER)?
        .as_array()
        .ok_or_else(|| shape_error(EMBEDDING_POINTER, "expected an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| shape_error(EMBEDDING_POINTER, "expected only numbers"))
        })
        .collect()
}

/// Overlay caller-supplied fields onto a payload object; extra keys win
pub fn merge_extra(mut payload: Value, extra: &Map<String, Value>) -> Value {
    if let Value::Object(map) = &mut payload {
        for (key, value) in extra {
            map.insert(key.clone(), value.clone());
        }
    }
    payload
}
