// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

pub mod anthropic_client;
pub mod error;
pub mod llm_basics;
pub mod llm_client;
pub mod llm_provider;
pub mod openai_client;
pub mod perplexity_client;
pub mod retry_utils;
pub mod transport;

pub use anthropic_client::{AnthropicChatOptions, AnthropicClient};
pub use error::{ClientError, ClientResult, FinalError, ResponseShapeError, TransportError};
pub use llm_basics::{
    ChatMessage, ChatReply, ConversationHistory, DEFAULT_SYSTEM_PROMPT, EmbeddingReply,
    MessageRole,
};
pub use llm_client::{Provider, ProviderClient};
pub use llm_provider::ChatProvider;
pub use openai_client::{OpenAIChatOptions, OpenAIClient, OpenAIEmbeddingOptions};
pub use perplexity_client::{PerplexityChatOptions, PerplexityClient};
pub use retry_utils::{FailureClass, RetryExecutor, RetryPolicy};
pub use transport::{RawResponse, Transport};
