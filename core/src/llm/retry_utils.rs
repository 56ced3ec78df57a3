// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

use backoff::backoff::Backoff;
use log::{debug, error, warn};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::llm::error::{ClientError, ClientResult, FinalError, TransportError};

/// Retry budget and backoff factor for one provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Delay before retry number `attempt + 1`: `backoff_factor * 2^attempt` seconds
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Fresh schedule for a single `execute` call
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Deterministic doubling backoff without jitter.
///
/// Yields `max_retries` delays and then `None`.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl BackoffSchedule {
    /// Retries already handed out
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for BackoffSchedule {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

/// Whether a failed attempt may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retriable,
    Terminal,
}

/// Classify a transport failure
pub fn classify(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Timeout(_) | TransportError::ConnectionFailure(_) => FailureClass::Retriable,
        TransportError::HttpStatus { status, .. } if should_retry_status_code(*status) => {
            FailureClass::Retriable
        }
        TransportError::HttpStatus { .. }
        | TransportError::MalformedBody(_)
        | TransportError::InvalidRequest(_) => FailureClass::Terminal,
    }
}

/// Check if an HTTP status code should be retried
fn should_retry_status_code(status_code: u16) -> bool {
    matches!(status_code, 429 | 500..=599)
}

fn into_terminal(err: TransportError) -> FinalError {
    match err {
        TransportError::HttpStatus { status, body } => FinalError::TerminalHttpStatus { status, body },
        other => FinalError::Terminal(other),
    }
}

/// Runs one request with bounded retry and exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    label: String,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// `label` prefixes every log line emitted for this executor
    pub fn new(label: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            label: label.into(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke `attempt_fn` until it succeeds, fails terminally, or the retry
    /// budget runs out. Makes at most `max_retries + 1` attempts.
    pub async fn execute<F, Fut, T>(
        &self,
        mut attempt_fn: F,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut schedule = self.policy.schedule();
        let mut attempts = 0u32;

        loop {
            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled(attempts)),
                    outcome = attempt_fn() => outcome,
                },
                None => attempt_fn().await,
            };
            attempts += 1;

            let err = match outcome {
                Ok(result) => {
                    if attempts > 1 {
                        debug!("[{}] Succeeded after {} retries", self.label, attempts - 1);
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if classify(&err) == FailureClass::Terminal {
                error!("[{}] Non-retriable error on attempt {}: {}", self.label, attempts, err);
                return Err(into_terminal(err).into());
            }

            let Some(delay) = schedule.next_backoff() else {
                error!(
                    "[{}] Giving up after {} attempt(s): {}",
                    self.label, attempts, err
                );
                return Err(FinalError::RetriesExhausted {
                    attempts,
                    last: err,
                }
                .into());
            };

            warn!(
                "[{}] Attempt {} failed, retrying in {:?}: {}",
                self.label, attempts, delay, err
            );

            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled(attempts)),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn cancelled(&self, attempts: u32) -> ClientError {
        debug!("[{}] Cancelled after {} attempt(s)", self.label, attempts);
        ClientError::Cancelled
    }
}
