// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, Settings};
use crate::llm::error::{ClientError, ClientResult};
use crate::llm::llm_basics::ConversationHistory;
use crate::llm::retry_utils::RetryExecutor;
use crate::llm::transport::Transport;

/// Base trait for all provider clients
#[async_trait]
pub trait ChatProvider: Send {
    /// Get the provider name for this client
    fn provider_name(&self) -> &str;

    /// Messages sent so far, oldest first
    fn history(&self) -> &ConversationHistory;

    fn is_closed(&self) -> bool;

    /// Append `query` as a user turn and return the raw envelope, using the
    /// provider's default options
    async fn send_query(&mut self, query: &str) -> ClientResult<Value>;

    /// Release the connection pool. Only the first call succeeds.
    fn close(&mut self) -> ClientResult<()>;
}

/// Transport plus retry executor, shared by every provider client.
///
/// Dropping the transport on `close` releases the pooled connections.
#[derive(Debug)]
pub(crate) struct Connection {
    label: &'static str,
    transport: Option<Transport>,
    executor: RetryExecutor,
}

impl Connection {
    pub(crate) fn new(label: &'static str, settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            label,
            transport: Some(Transport::new(settings)?),
            executor: RetryExecutor::new(label, settings.retry_policy()),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    pub(crate) fn ensure_open(&self) -> ClientResult<&Transport> {
        self.transport.as_ref().ok_or(ClientError::Closed)
    }

    /// POST `payload` to `path` through the retry executor
    pub(crate) async fn post(
        &self,
        path: &str,
        payload: &Value,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<Value> {
        let transport = self.ensure_open()?;
        debug!("[{}] POST {}", self.label, path);

        let response = self
            .executor
            .execute(
                move || transport.send(Method::POST, path, Some(payload)),
                cancel,
            )
            .await?;

        Ok(response.body)
    }

    pub(crate) fn close(&mut self) -> ClientResult<()> {
        match self.transport.take() {
            Some(transport) => {
                drop(transport);
                debug!("[{}] Connection closed", self.label);
                Ok(())
            }
            None => Err(ClientError::Closed),
        }
    }
}
