// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use url::Url;

use crate::config::{ConfigError, Settings};
use crate::llm::error::TransportError;
use crate::llm::llm_client::Provider;

/// Successful response: status below 400 and a JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

/// HTTP request issuer bound to one provider endpoint.
///
/// Every `send` is exactly one round trip. Retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    base_url: Url,
}

impl Transport {
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .default_headers(default_headers(settings)?)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url().clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` beneath the base URL
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{path}: {e}")))
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url_for(path)?;
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(TransportError::from_reqwest)?;

        if status >= 400 {
            return Err(TransportError::HttpStatus { status, body: text });
        }

        let body = serde_json::from_str(&text)
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;

        Ok(RawResponse { status, body })
    }
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        // never echo credentials back
        value: "<redacted>".to_string(),
        reason: e.to_string(),
    })
}

fn default_headers(settings: &Settings) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match settings.provider() {
        Provider::OpenAI => {
            let mut auth = header_value("api_key", &format!("Bearer {}", settings.api_key()))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }
        Provider::Anthropic => {
            let mut key = header_value("api_key", settings.api_key())?;
            key.set_sensitive(true);
            headers.insert(HeaderName::from_static("x-api-key"), key);

            let version = settings
                .api_version()
                .unwrap_or(crate::config::DEFAULT_ANTHROPIC_VERSION);
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_str(version).map_err(|e| ConfigError::InvalidValue {
                    key: "api_version".to_string(),
                    value: version.to_string(),
                    reason: e.to_string(),
                })?,
            );
        }
        Provider::Perplexity => {
            let mut auth = header_value("api_key", &format!("Bearer {}", settings.api_key()))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsOverrides;
    use crate::llm::error::{ClientError, FinalError};
    use crate::llm::retry_utils::RetryExecutor;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn settings(provider: Provider, base_url: &str) -> Settings {
        Settings::resolve(
            provider,
            SettingsOverrides::new()
                .with_api_key("test_key")
                .with_base_url(base_url),
            &HashMap::new(),
        )
        .unwrap()
    }

    /// Accepts connections and never answers
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}/")
    }

    fn settings_with(base_url: &str, timeout: Duration, max_retries: u32) -> Settings {
        Settings::resolve(
            Provider::OpenAI,
            SettingsOverrides::new()
                .with_api_key("test_key")
                .with_base_url(base_url)
                .with_timeout(timeout)
                .with_max_retries(max_retries)
                .with_backoff_factor(0.0),
            &HashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_url_for_joins_beneath_base() {
        let transport = Transport::new(&settings(Provider::OpenAI, "https://example.com/v1")).unwrap();
        assert_eq!(
            transport.url_for("chat/completions").unwrap().as_str(),
            "https://example.com/v1/chat/completions"
        );
        assert_eq!(
            transport.url_for("/embeddings").unwrap().as_str(),
            "https://example.com/v1/embeddings"
        );
    }

    #[test]
    fn test_invalid_credential_header() {
        let bad = Settings::resolve(
            Provider::OpenAI,
            SettingsOverrides::new().with_api_key("line\nbreak"),
            &HashMap::new(),
        )
        .unwrap();
        assert!(matches!(Transport::new(&bad), Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test_key")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({"model": "m"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let transport = Transport::new(&settings(Provider::OpenAI, &server.url())).unwrap();
        let response = transport
            .send(Method::POST, "chat/completions", Some(&serde_json::json!({"model": "m"})))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_send_http_status_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let transport = Transport::new(&settings(Provider::Anthropic, &server.url())).unwrap();
        let result = transport.send(Method::POST, "messages", None).await;

        mock.assert_async().await;
        assert_eq!(
            result,
            Err(TransportError::HttpStatus {
                status: 429,
                body: "slow down".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_send_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let transport = Transport::new(&settings(Provider::Perplexity, &server.url())).unwrap();
        let result = transport.send(Method::POST, "chat/completions", None).await;
        assert!(matches!(result, Err(TransportError::MalformedBody(_))));
    }

    #[tokio::test]
    async fn test_provider_headers() {
        let mut server = mockito::Server::new_async().await;
        let anthropic = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test_key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let perplexity = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test_key")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        Transport::new(&settings(Provider::Anthropic, &server.url()))
            .unwrap()
            .send(Method::POST, "messages", None)
            .await
            .unwrap();
        Transport::new(&settings(Provider::Perplexity, &server.url()))
            .unwrap()
            .send(Method::POST, "chat/completions", None)
            .await
            .unwrap();

        anthropic.assert_async().await;
        perplexity.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure() {
        // port 9 on localhost is the discard port and is normally closed
        let transport = Transport::new(&settings(Provider::OpenAI, "http://127.0.0.1:9/")).unwrap();
        let result = transport.send(Method::POST, "chat/completions", None).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailure(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let base_url = silent_server().await;
        let settings = settings_with(&base_url, Duration::from_millis(100), 2);
        let transport = Transport::new(&settings).unwrap();
        let executor = RetryExecutor::new("test", settings.retry_policy());

        let timed_out = transport.send(Method::POST, "chat/completions", None).await;
        assert!(matches!(timed_out, Err(TransportError::Timeout(_))));

        let result = executor
            .execute(|| transport.send(Method::POST, "chat/completions", None), None)
            .await;
        match result {
            Err(ClientError::Final(FinalError::RetriesExhausted { attempts, last })) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, TransportError::Timeout(_)));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_in_flight_request() {
        let base_url = silent_server().await;
        let settings = settings_with(&base_url, Duration::from_secs(60), 5);
        let transport = Transport::new(&settings).unwrap();
        let executor = RetryExecutor::new("test", settings.retry_policy());
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let calls = AtomicU32::new(0);
        let result = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    transport.send(Method::POST, "chat/completions", None)
                },
                Some(&token),
            )
            .await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
